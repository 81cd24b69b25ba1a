//! Aggregate store abstraction
//!
//! The store is the only shared mutable state in the service. Implementations
//! must make [`AggregateStore::accumulate`] a single atomic read-modify-write
//! per key; callers never read-then-write.

use crate::protocol::AggregateRecord;
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryAggregateStore;

/// Store for per-task duration aggregates
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Atomically fold `duration_ms` into the record for `task_id`, creating
    /// it with a count of one when absent. Returns the new total.
    async fn accumulate(&self, task_id: &str, duration_ms: u64) -> Result<u64, StoreError>;

    /// Point lookup. Absence is `Ok(None)`, not an error.
    async fn get(&self, task_id: &str) -> Result<Option<AggregateRecord>, StoreError>;

    /// Backend name for logs and health output
    fn name(&self) -> &str;
}

/// Store failures, always distinct from "record not found"
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Aggregate store unavailable: {0}")]
    Unavailable(String),
    #[error("Total duration overflow for task {task_id}")]
    Overflow { task_id: String },
}
