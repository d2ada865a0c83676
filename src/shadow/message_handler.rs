//! Pure routing of MQTT events into shadow-level decisions
//!
//! Nothing here performs I/O: the event loop in [`super::client`] feeds
//! packets through these functions and acts on the result.

use crate::protocol::{OperationStatus, ShadowDocument, ShadowOperation, ShadowTopic, ShadowTopicKind};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use serde_json::Value;
use tracing::debug;

/// Routing decision for a raw MQTT event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Infrastructure event (PingResp, SubAck, ...)
    InfrastructureEvent(String),
    /// Outgoing event (handled by rumqttc)
    OutgoingEvent,
}

/// Shadow-level meaning of an incoming publish
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowMessage {
    /// Desired and reported state diverged
    Delta { thing_name: String, state: Value },
    /// Response to an update or get request
    Response {
        thing_name: String,
        operation: ShadowOperation,
        status: OperationStatus,
        client_token: Option<String>,
        document: Value,
    },
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT v5 event to its handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Interpret a publish on a reserved shadow topic
    ///
    /// Returns `None` for topics outside the shadow grammar and for payloads
    /// that are not JSON.
    pub fn interpret_shadow_message(topic: &str, payload: &[u8]) -> Option<ShadowMessage> {
        let (thing_name, kind) = ShadowTopic::parse(topic)?;

        let document: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Ignoring non-JSON shadow payload on {}: {}", topic, e);
                return None;
            }
        };

        match kind {
            ShadowTopicKind::Delta => {
                let state = document.get("state").cloned().unwrap_or(Value::Null);
                Some(ShadowMessage::Delta { thing_name, state })
            }
            ShadowTopicKind::Response(operation, status) => {
                let client_token = ShadowDocument::parse(payload)
                    .ok()
                    .and_then(|doc| doc.client_token);
                Some(ShadowMessage::Response {
                    thing_name,
                    operation,
                    status,
                    client_token,
                    document,
                })
            }
        }
    }
}
