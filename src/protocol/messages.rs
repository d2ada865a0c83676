//! Wire message types
//!
//! Payloads published by the agent and exchanged with the shadow service.
//! Percentages serialize the way a JSON producer without an integer/float
//! distinction writes them: whole values as integers, others as floats.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Lifecycle announcement published once per connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloMessage {
    #[serde(rename = "Name")]
    pub name: String,
}

impl HelloMessage {
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            name: thing_name.into(),
        }
    }
}

/// One metrics sample: CPU and free-memory percentages in [0, 100]
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MetricsReport {
    #[serde(serialize_with = "serialize_percentage")]
    pub cpu: f64,
    #[serde(serialize_with = "serialize_percentage")]
    pub mem: f64,
}

impl MetricsReport {
    /// Scale fractions to percentages, clamped to [0, 100]
    pub fn from_fractions(cpu_fraction: f64, mem_fraction: f64) -> Self {
        Self {
            cpu: to_percentage(cpu_fraction),
            mem: to_percentage(mem_fraction),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn to_percentage(fraction: f64) -> f64 {
    if fraction.is_nan() {
        return 0.0;
    }
    (fraction * 100.0).clamp(0.0, 100.0)
}

fn serialize_percentage<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Shadow update request: `{"state": ..., "clientToken": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowUpdateRequest {
    pub state: Value,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// Shadow get request: `{"clientToken": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowGetRequest {
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// Fields of interest in any shadow document or response
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(rename = "clientToken", default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

impl ShadowDocument {
    /// Parse a shadow payload, tolerating unknown fields
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
