//! Message types and topic layout
//!
//! Defines what the agent publishes, where it publishes it, and the
//! device-shadow topic grammar the shadow client subscribes to.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
