//! Wire and domain message types for the task aggregation service
//!
//! This module holds the value types exchanged between the adapters (HTTP,
//! MQTT) and the workflow core, plus the validation rules applied to them
//! before a [`TaskContext`] can be built.

pub mod messages;
pub mod validation;

pub use messages::*;
pub use validation::*;
