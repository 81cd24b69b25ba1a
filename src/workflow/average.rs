use crate::error::{TrackerError, TrackerResult};
use crate::observability::metrics::metrics;
use crate::protocol::AverageResult;
use crate::store::AggregateStore;
use std::sync::Arc;
use tracing::debug;

/// Computes the floored average duration for a task identifier
#[derive(Clone)]
pub struct AverageCalculator {
    store: Arc<dyn AggregateStore>,
}

impl AverageCalculator {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// `total / count` with integer (floor) division
    ///
    /// A never-seen identifier is [`TrackerError::NotFound`]; a store fault
    /// is [`TrackerError::Processing`].
    #[tracing::instrument(name = "compute_average", skip(self))]
    pub async fn compute_average(&self, task_id: &str) -> TrackerResult<AverageResult> {
        let record = self
            .store
            .get(task_id)
            .await
            .map_err(|e| TrackerError::processing(task_id, e))?;

        // A stored record always has count >= 1; an empty one reads as absent
        let Some(average_duration_ms) = record.as_ref().and_then(|r| r.average_ms()) else {
            metrics().average_not_found();
            return Err(TrackerError::not_found(task_id));
        };

        debug!(average_duration_ms, "average computed");
        metrics().average_served();
        Ok(AverageResult {
            task_id: task_id.to_string(),
            average_duration_ms,
        })
    }
}
