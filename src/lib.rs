//! IoT Telemetry Agent
//!
//! Connects a device to a device-shadow service over MQTT with mutual TLS,
//! announces itself on every connect and reports host CPU and free memory
//! once per second while the session is up.
//!
//! # Overview
//!
//! - [`config`] - Device configuration loading and validation
//! - [`protocol`] - Topic naming and wire messages
//! - [`shadow`] - Device-shadow client over `rumqttc`
//! - [`agent`] - Lifecycle state machine and metrics sampling
//! - [`observability`] - Structured logging and counters
//!
//! # Quick Start
//!
//! ```rust
//! use iot_telemetry_agent::protocol::{HelloMessage, MetricsReport, Topics};
//!
//! let topics = Topics::new("sensor", "rpi-01");
//! assert_eq!(topics.hello(), "sensor/hello");
//! assert_eq!(topics.report(), "sensor/rpi-01");
//!
//! let hello = serde_json::to_string(&HelloMessage::new("rpi-01")).unwrap();
//! assert_eq!(hello, r#"{"Name":"rpi-01"}"#);
//!
//! let report = MetricsReport::from_fractions(0.12, 0.35);
//! assert_eq!(report.to_json().unwrap(), r#"{"cpu":12,"mem":35}"#);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod shadow;
pub mod testing;

pub use agent::{AgentState, MetricsSampler, SystemSampler, TelemetryAgent};
pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use shadow::{MqttShadowClient, ShadowClient, ShadowEvent, ShadowOptions};
