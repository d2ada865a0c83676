//! Telemetry agent: lifecycle state machine and metrics sampling

pub mod lifecycle;
pub mod sampler;

pub use lifecycle::*;
pub use sampler::*;
