//! Device configuration loading
//!
//! The agent reads one configuration document naming the shadow endpoint, the
//! device identity and the credential files. JSON with PascalCase keys is the
//! native format; a `.toml` extension switches the parser to TOML with the
//! same keys. Every field is required and nothing is defaulted.

use crate::protocol::Topics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "IOT_CONFIG_PATH";

/// Configuration path used when neither the CLI nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "/home/pi/certs/config.json";

/// Immutable agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentConfig {
    /// Shadow service endpoint host
    pub host: String,
    /// Shadow service endpoint port
    pub port: u16,
    /// Service region
    pub region: String,
    /// MQTT client identifier, unique per connection
    pub client_id: String,
    /// Registered device identity
    pub thing_name: String,
    /// Device type, used as the topic prefix
    pub thing_type_name: String,
    /// CA certificate path (PEM)
    pub ca_cert: PathBuf,
    /// Client certificate path (PEM)
    pub client_cert: PathBuf,
    /// Client private key path (PEM)
    pub private_key: PathBuf,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Required field is empty: {0}")]
    EmptyField(&'static str),
    #[error("Invalid port: {0}")]
    InvalidPort(u16),
    #[error("Invalid {field} '{value}': must match [a-zA-Z0-9:_-]+")]
    InvalidName { field: &'static str, value: String },
}

/// Resolve the configuration path: CLI override, then `IOT_CONFIG_PATH`, then the fixed default
pub fn resolve_config_path(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

impl AgentConfig {
    /// Load, validate and finalize configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse(&content, is_toml(path))?;
        config.validate()?;

        if let Some(base_dir) = path.parent() {
            config.resolve_credential_paths(base_dir);
        }

        Ok(config)
    }

    /// Parse configuration text without touching the filesystem
    pub fn parse(content: &str, toml_format: bool) -> Result<Self, ConfigError> {
        if toml_format {
            Ok(toml::from_str(content)?)
        } else {
            Ok(serde_json::from_str(content)?)
        }
    }

    /// Reject empty fields, a zero port and names that cannot form topic levels
    pub fn validate(&self) -> Result<(), ConfigError> {
        let strings = [
            ("Host", self.host.as_str()),
            ("Region", self.region.as_str()),
            ("ClientId", self.client_id.as_str()),
            ("ThingName", self.thing_name.as_str()),
            ("ThingTypeName", self.thing_type_name.as_str()),
        ];
        for (field, value) in strings {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }

        let paths = [
            ("CaCert", &self.ca_cert),
            ("ClientCert", &self.client_cert),
            ("PrivateKey", &self.private_key),
        ];
        for (field, value) in paths {
            if value.as_os_str().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        validate_name("ThingName", &self.thing_name)?;
        validate_name("ThingTypeName", &self.thing_type_name)?;

        Ok(())
    }

    /// Anchor relative credential paths at the configuration file's directory
    fn resolve_credential_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.ca_cert,
            &mut self.client_cert,
            &mut self.private_key,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    /// Derive the hello and report topics
    pub fn topics(&self) -> Topics {
        Topics::new(&self.thing_type_name, &self.thing_name)
    }

    /// Endpoint as shown in the connect log line
    pub fn endpoint(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let json = r#"{
            "Host": "example-ats.iot.eu-west-1.amazonaws.com",
            "Port": 8883,
            "Region": "eu-west-1",
            "ClientId": "rpi-01-client",
            "ThingName": "rpi-01",
            "ThingTypeName": "sensor",
            "CaCert": "/certs/root-CA.crt",
            "ClientCert": "/certs/rpi-01.cert.pem",
            "PrivateKey": "/certs/rpi-01.private.key"
        }"#;
        serde_json::from_str(json).expect("Test config should parse")
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Thing and thing-type names follow the device registry naming rule
fn validate_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-');

    if value.is_empty() || !valid {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
