//! Workflow core
//!
//! The dispatcher routes a [`TaskContext`](crate::protocol::TaskContext) to
//! one of two operations:
//!
//! - [`TaskProcessor`]: run the processing pipeline, then accumulate
//! - [`AverageCalculator`]: read the aggregate and compute a floored average
//!
//! [`TaskService`] is the facade both adapters call.

pub mod average;
pub mod dispatcher;
pub mod processor;
pub mod service;

pub use average::AverageCalculator;
pub use dispatcher::WorkflowDispatcher;
pub use processor::TaskProcessor;
pub use service::TaskService;
