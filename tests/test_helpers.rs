//! Test helpers and utilities for integration tests

use iot_telemetry_agent::config::AgentConfig;
use iot_telemetry_agent::testing::{FixedSampler, MockShadowClient};
use iot_telemetry_agent::TelemetryAgent;
use std::path::PathBuf;
use std::sync::Arc;

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> AgentConfig {
    AgentConfig {
        host: "example-ats.iot.eu-west-1.amazonaws.com".to_string(),
        port: 8883,
        region: "eu-west-1".to_string(),
        client_id: "rpi-01-client".to_string(),
        thing_name: "rpi-01".to_string(),
        thing_type_name: "sensor".to_string(),
        ca_cert: PathBuf::from("/certs/root-CA.crt"),
        client_cert: PathBuf::from("/certs/rpi-01.cert.pem"),
        private_key: PathBuf::from("/certs/rpi-01.private.key"),
    }
}

/// Agent wired to a recording client and a sampler reporting 12% CPU and 35% free memory
#[allow(dead_code)]
pub fn test_agent() -> (
    TelemetryAgent<MockShadowClient, FixedSampler>,
    Arc<MockShadowClient>,
) {
    let client = Arc::new(MockShadowClient::new());
    let agent = TelemetryAgent::new(
        &test_config(),
        Arc::clone(&client),
        FixedSampler::new(0.12, 0.35),
    );
    (agent, client)
}

/// Valid configuration document in the device's native JSON form
#[allow(dead_code)]
pub fn valid_config_json() -> &'static str {
    r#"{
    "Host": "example-ats.iot.eu-west-1.amazonaws.com",
    "Port": 8883,
    "Region": "eu-west-1",
    "ClientId": "rpi-01-client",
    "ThingName": "rpi-01",
    "ThingTypeName": "sensor",
    "CaCert": "root-CA.crt",
    "ClientCert": "rpi-01.cert.pem",
    "PrivateKey": "rpi-01.private.key"
}"#
}
