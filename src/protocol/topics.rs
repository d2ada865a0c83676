//! Topic derivation for agent messages and device-shadow reserved topics
//!
//! Agent topics are derived once from the configured thing type and thing
//! name. Shadow topics follow the reserved `$aws/things/{thing}/shadow/...`
//! grammar used by the shadow service.

use std::fmt;

const SHADOW_PREFIX: &str = "$aws/things/";

/// Topics the agent publishes to, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    hello: String,
    report: String,
}

impl Topics {
    /// Build `{thing_type}/hello` and `{thing_type}/{thing}`
    pub fn new(thing_type_name: &str, thing_name: &str) -> Self {
        Self {
            hello: format!("{thing_type_name}/hello"),
            report: format!("{thing_type_name}/{thing_name}"),
        }
    }

    /// Lifecycle announcement topic
    pub fn hello(&self) -> &str {
        &self.hello
    }

    /// Periodic metrics topic
    pub fn report(&self) -> &str {
        &self.report
    }
}

/// Shadow operation a request or response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowOperation {
    Update,
    Get,
}

impl ShadowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowOperation::Update => "update",
            ShadowOperation::Get => "get",
        }
    }
}

impl fmt::Display for ShadowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the service for a shadow operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Accepted,
    Rejected,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Accepted => f.write_str("accepted"),
            OperationStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// Incoming shadow topic kinds the client reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTopicKind {
    Delta,
    Response(ShadowOperation, OperationStatus),
}

/// Construction and parsing of reserved shadow topics
pub struct ShadowTopic;

impl ShadowTopic {
    /// Request topic: `$aws/things/{thing}/shadow/{operation}`
    pub fn request(thing_name: &str, operation: ShadowOperation) -> String {
        format!("{SHADOW_PREFIX}{thing_name}/shadow/{operation}")
    }

    /// Delta topic: `$aws/things/{thing}/shadow/update/delta`
    pub fn delta(thing_name: &str) -> String {
        format!("{SHADOW_PREFIX}{thing_name}/shadow/update/delta")
    }

    /// Response topic: `$aws/things/{thing}/shadow/{operation}/{status}`
    pub fn response(thing_name: &str, operation: ShadowOperation, status: OperationStatus) -> String {
        format!("{SHADOW_PREFIX}{thing_name}/shadow/{operation}/{status}")
    }

    /// Every topic a registered thing subscribes to
    pub fn subscriptions(thing_name: &str) -> Vec<String> {
        let mut topics = vec![Self::delta(thing_name)];
        for operation in [ShadowOperation::Update, ShadowOperation::Get] {
            for status in [OperationStatus::Accepted, OperationStatus::Rejected] {
                topics.push(Self::response(thing_name, operation, status));
            }
        }
        topics
    }

    /// Split an incoming topic into thing name and kind
    pub fn parse(topic: &str) -> Option<(String, ShadowTopicKind)> {
        let rest = topic.strip_prefix(SHADOW_PREFIX)?;
        let (thing_name, suffix) = rest.split_once("/shadow/")?;
        if thing_name.is_empty() || thing_name.contains('/') {
            return None;
        }

        let kind = match suffix {
            "update/delta" => ShadowTopicKind::Delta,
            "update/accepted" => {
                ShadowTopicKind::Response(ShadowOperation::Update, OperationStatus::Accepted)
            }
            "update/rejected" => {
                ShadowTopicKind::Response(ShadowOperation::Update, OperationStatus::Rejected)
            }
            "get/accepted" => {
                ShadowTopicKind::Response(ShadowOperation::Get, OperationStatus::Accepted)
            }
            "get/rejected" => {
                ShadowTopicKind::Response(ShadowOperation::Get, OperationStatus::Rejected)
            }
            _ => return None,
        };

        Some((thing_name.to_string(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn topics_are_prefixed_by_thing_type(
            thing_type in "[a-zA-Z0-9:_-]{1,32}",
            thing in "[a-zA-Z0-9:_-]{1,32}",
        ) {
            let topics = Topics::new(&thing_type, &thing);
            prop_assert_eq!(topics.hello(), format!("{}/hello", thing_type));
            prop_assert_eq!(topics.report(), format!("{}/{}", thing_type, thing));
        }

        #[test]
        fn shadow_delta_topic_parses_back(thing in "[a-zA-Z0-9:_-]{1,64}") {
            let parsed = ShadowTopic::parse(&ShadowTopic::delta(&thing));
            prop_assert_eq!(parsed, Some((thing, ShadowTopicKind::Delta)));
        }
    }

    #[test]
    fn test_agent_topics_example() {
        let topics = Topics::new("sensor", "rpi-01");
        assert_eq!(topics.hello(), "sensor/hello");
        assert_eq!(topics.report(), "sensor/rpi-01");
    }

    #[test]
    fn test_shadow_request_topics() {
        assert_eq!(
            ShadowTopic::request("rpi-01", ShadowOperation::Update),
            "$aws/things/rpi-01/shadow/update"
        );
        assert_eq!(
            ShadowTopic::request("rpi-01", ShadowOperation::Get),
            "$aws/things/rpi-01/shadow/get"
        );
    }

    #[test]
    fn test_shadow_subscriptions() {
        let topics = ShadowTopic::subscriptions("rpi-01");
        assert_eq!(topics.len(), 5);
        assert_eq!(topics[0], "$aws/things/rpi-01/shadow/update/delta");
        assert!(topics.contains(&"$aws/things/rpi-01/shadow/get/rejected".to_string()));
    }

    #[test]
    fn test_parse_response_topics() {
        assert_eq!(
            ShadowTopic::parse("$aws/things/rpi-01/shadow/update/accepted"),
            Some((
                "rpi-01".to_string(),
                ShadowTopicKind::Response(ShadowOperation::Update, OperationStatus::Accepted)
            ))
        );
        assert_eq!(
            ShadowTopic::parse("$aws/things/rpi-01/shadow/get/rejected"),
            Some((
                "rpi-01".to_string(),
                ShadowTopicKind::Response(ShadowOperation::Get, OperationStatus::Rejected)
            ))
        );
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert_eq!(ShadowTopic::parse("sensor/rpi-01"), None);
        assert_eq!(ShadowTopic::parse("$aws/things//shadow/update/delta"), None);
        assert_eq!(ShadowTopic::parse("$aws/things/rpi-01/shadow/delete"), None);
        assert_eq!(
            ShadowTopic::parse("$aws/things/rpi-01/shadow/update/documents"),
            None
        );
    }
}
