//! Device-shadow client
//!
//! The agent talks to the shadow service through the [`ShadowClient`] trait
//! and learns about the connection through a stream of [`ShadowEvent`]s. The
//! production implementation, [`MqttShadowClient`], runs over `rumqttc` with
//! mutual TLS.
//!
//! # Architecture
//!
//! - [`connection`] - Pure option construction, credentials and backoff
//! - [`message_handler`] - Pure routing of MQTT packets to shadow meaning
//! - [`pending`] - Client-token tracking for shadow operations
//! - [`client`] - The event loop supervisor and the public handle

use crate::protocol::OperationStatus;
use serde_json::Value;

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod pending;

pub use client::MqttShadowClient;
pub use connection::{ConnectionState, ReconnectConfig, ShadowError, ShadowOptions};
pub use message_handler::{EventRoute, MessageHandler, ShadowMessage};
pub use pending::{PendingOperation, PendingOperations};

/// Lifecycle and shadow events raised by the shadow client
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowEvent {
    /// Session established
    Connect,
    /// Session lost or closed
    Close,
    /// Transport or protocol error
    Error(String),
    /// Desired and reported state differ for a device
    Delta { thing_name: String, state: Value },
    /// A shadow operation got no response before its deadline
    Timeout {
        thing_name: String,
        client_token: String,
    },
    /// A shadow operation was accepted or rejected
    Status {
        thing_name: String,
        status: OperationStatus,
        client_token: String,
        document: Value,
    },
}

/// Publishing side of the shadow client
///
/// Publishing is fire-and-forget: an `Ok` means the message was handed to
/// the transport, not that the service received it.
#[async_trait::async_trait]
pub trait ShadowClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: String) -> Result<(), Self::Error>;

    /// Check if the session is currently established; reports are skipped while it is not
    fn is_connected(&self) -> bool;
}
