//! In-process aggregate store backed by a sharded concurrent map
//!
//! Each key lives in one `DashMap` shard; `accumulate` holds that shard's
//! write guard for the whole read-modify-write, so writers to the same key are
//! serialized while writers to keys in other shards proceed in parallel.

use super::{AggregateStore, StoreError};
use crate::protocol::AggregateRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    total_duration_ms: u64,
    count: u64,
}

/// Sharded in-memory aggregate store
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    records: DashMap<String, Totals>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct task identifiers with a record
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fold one duration into `totals`, leaving it untouched on overflow
    fn fold(totals: &mut Totals, task_id: &str, duration_ms: u64) -> Result<u64, StoreError> {
        let overflow = || StoreError::Overflow {
            task_id: task_id.to_string(),
        };
        let total = totals
            .total_duration_ms
            .checked_add(duration_ms)
            .ok_or_else(overflow)?;
        let count = totals.count.checked_add(1).ok_or_else(overflow)?;

        totals.total_duration_ms = total;
        totals.count = count;
        Ok(total)
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn accumulate(&self, task_id: &str, duration_ms: u64) -> Result<u64, StoreError> {
        // Shard write guard is held until `entry` drops
        let mut entry = match self.records.get_mut(task_id) {
            Some(existing) => existing,
            None => self.records.entry(task_id.to_string()).or_default(),
        };
        let total = Self::fold(entry.value_mut(), task_id, duration_ms)?;
        trace!(task_id, total, count = entry.count, "accumulated");
        Ok(total)
    }

    async fn get(&self, task_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        Ok(self.records.get(task_id).map(|totals| AggregateRecord {
            task_id: task_id.to_string(),
            total_duration_ms: totals.total_duration_ms,
            count: totals.count,
        }))
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
