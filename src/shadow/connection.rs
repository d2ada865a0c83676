//! Connection configuration for the shadow client
//!
//! Pure construction of `rumqttc` options from the agent configuration:
//! mutual-TLS credentials, keep-alive, and the reconnect backoff schedule.

use crate::config::AgentConfig;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// ALPN protocol that lets the service accept MQTT on port 443
const MQTT_ALPN_PROTOCOL: &[u8] = b"x-amzn-mqtt-ca";

/// Connection state published by the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, publishing allowed
    Connected,
    /// Disconnected with reason, the event loop keeps retrying
    Disconnected(String),
    /// Client was shut down
    Closed,
}

/// Reconnection backoff configuration
///
/// Delays double from `initial_delay` up to `max_delay`. The shadow service
/// throttles connects per client ID, so the first retry waits a full second.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay: u64,
    /// Upper bound on any delay, in milliseconds
    pub max_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: 1_000,
            max_delay: 128_000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for a 1-based attempt number
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u64 << doublings)
            .min(self.max_delay)
    }
}

/// Tunables of the shadow client that are not part of the device configuration
#[derive(Debug, Clone)]
pub struct ShadowOptions {
    /// Log every MQTT packet at debug level
    pub debug: bool,
    /// MQTT keep-alive interval
    pub keep_alive: Duration,
    /// Deadline for shadow operations before a timeout event is raised
    pub operation_timeout: Duration,
    /// Capacity of the request and event channels
    pub channel_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for ShadowOptions {
    fn default() -> Self {
        Self {
            debug: false,
            keep_alive: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(10),
            channel_capacity: 64,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Shadow client errors
#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("Failed to read credential {path}: {source}")]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing failed")]
    PublishFailed(#[source] rumqttc::v5::ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] rumqttc::v5::ClientError),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] rumqttc::v5::ClientError),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
}

/// PEM material read from the configured credential paths
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl TlsCredentials {
    /// Read all three credential files
    pub fn load(config: &AgentConfig) -> Result<Self, ShadowError> {
        Ok(Self {
            ca: read_credential(&config.ca_cert)?,
            client_cert: read_credential(&config.client_cert)?,
            private_key: read_credential(&config.private_key)?,
        })
    }
}

fn read_credential(path: &Path) -> Result<Vec<u8>, ShadowError> {
    std::fs::read(path).map_err(|source| ShadowError::CredentialRead {
        path: path.to_path_buf(),
        source,
    })
}

/// ALPN is only needed when MQTT runs over the HTTPS port
pub fn alpn_for_port(port: u16) -> Option<Vec<Vec<u8>>> {
    (port == 443).then(|| vec![MQTT_ALPN_PROTOCOL.to_vec()])
}

/// Build MQTT options with mutual TLS from configuration and credentials
pub fn configure_mqtt_options(
    config: &AgentConfig,
    credentials: TlsCredentials,
    options: &ShadowOptions,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    let transport = RumqttcTransport::tls(
        credentials.ca,
        Some((credentials.client_cert, credentials.private_key)),
        alpn_for_port(config.port),
    );
    mqtt_options.set_transport(transport);
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);

    mqtt_options
}
