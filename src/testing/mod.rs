//! Testing utilities and mock implementations
//!
//! Lets the telemetry agent run without a broker or real host metrics.

pub mod mocks;

pub use mocks::*;
