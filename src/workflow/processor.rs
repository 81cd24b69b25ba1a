//! Task processing: run the pipeline, then fold the event into its aggregate

use crate::error::{TrackerError, TrackerResult};
use crate::observability::metrics::metrics;
use crate::pipeline::ProcessingPipeline;
use crate::protocol::{TaskEvent, TaskResponse};
use crate::store::AggregateStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Instrument};

/// Runs processing steps and accumulation for one task event
#[derive(Clone)]
pub struct TaskProcessor {
    pipeline: Arc<ProcessingPipeline>,
    store: Arc<dyn AggregateStore>,
    pipeline_deadline: Option<Duration>,
}

impl TaskProcessor {
    pub fn new(pipeline: Arc<ProcessingPipeline>, store: Arc<dyn AggregateStore>) -> Self {
        Self {
            pipeline,
            store,
            pipeline_deadline: None,
        }
    }

    /// Fail events whose steps run longer than `deadline`
    ///
    /// Only the steps are bounded. An accumulate that has been issued is
    /// always awaited, so a reported failure means the duration was not
    /// counted.
    pub fn with_pipeline_deadline(mut self, deadline: Duration) -> Self {
        self.pipeline_deadline = Some(deadline);
        self
    }

    pub fn pipeline(&self) -> &ProcessingPipeline {
        &self.pipeline
    }

    /// Run every step, then accumulate the duration
    ///
    /// A step failure aborts before accumulation. There is no retry; any
    /// failure comes back as [`TrackerError::Processing`] naming the task.
    #[tracing::instrument(
        name = "process_task",
        skip(self, event),
        fields(task_id = %event.task_id(), duration_ms = event.duration_ms())
    )]
    pub async fn process(&self, event: TaskEvent) -> TrackerResult<TaskResponse> {
        let in_flight = InFlight::start();

        let result = self.run(&event).await;
        in_flight.finish(result.is_ok());
        result
    }

    async fn run(&self, event: &TaskEvent) -> TrackerResult<TaskResponse> {
        let steps = self.pipeline.run(event);
        let stepped = match self.pipeline_deadline {
            Some(limit) => tokio::time::timeout(limit, steps).await.map_err(|_| {
                TrackerError::processing(
                    event.task_id(),
                    format!("processing steps did not finish within {limit:?}"),
                )
            })?,
            None => steps.await,
        };
        stepped.map_err(|e| TrackerError::processing(event.task_id(), e))?;

        let total = self.accumulate_detached(event).await?;
        info!(total_duration_ms = total, "task event aggregated");
        Ok(TaskResponse::ok())
    }

    /// Issue the accumulate on its own task
    ///
    /// Once spawned, the update completes even if this future is dropped, so
    /// a caller timing out can never leave the record half-written.
    async fn accumulate_detached(&self, event: &TaskEvent) -> TrackerResult<u64> {
        let store = self.store.clone();
        let task_id = event.task_id().to_string();
        let duration_ms = event.duration_ms();
        let span = crate::store_span!(op = "accumulate", task_id = %task_id, backend = store.name());

        let handle = tokio::spawn(
            {
                let task_id = task_id.clone();
                async move { store.accumulate(&task_id, duration_ms).await }
            }
            .instrument(span),
        );

        handle
            .await
            .map_err(|e| TrackerError::processing(&task_id, e))?
            .map_err(|e| TrackerError::processing(&task_id, e))
    }
}

/// In-flight bookkeeping that still settles if the caller drops the future
struct InFlight {
    started: Instant,
    settled: bool,
}

impl InFlight {
    fn start() -> Self {
        metrics().event_processing_started();
        Self {
            started: Instant::now(),
            settled: false,
        }
    }

    fn finish(mut self, success: bool) {
        self.settle(success);
    }

    fn settle(&mut self, success: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        if success {
            metrics().event_processed(self.started.elapsed());
        } else {
            metrics().event_failed(self.started.elapsed());
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.settle(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAggregateStore;
    use crate::testing::mocks::{FailingStep, FailingStore, RecordingStep, SlowStep, SlowStore};
    use std::sync::Mutex;

    fn event(task_id: &str, duration_ms: u64) -> TaskEvent {
        TaskEvent::new(task_id, duration_ms).unwrap()
    }

    #[tokio::test]
    async fn test_process_accumulates_and_acknowledges() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let processor = TaskProcessor::new(Arc::new(ProcessingPipeline::empty()), store.clone());

        let response = processor.process(event("t1", 1000)).await.unwrap();
        assert_eq!(response, TaskResponse::ok());

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.total_duration_ms, 1000);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_step_failure_skips_accumulation() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ProcessingPipeline::new(
            vec![
                Box::new(RecordingStep::new("first", log.clone())),
                Box::new(FailingStep::new("second", "refused")),
                Box::new(RecordingStep::new("third", log.clone())),
            ],
            4,
        );
        let processor = TaskProcessor::new(Arc::new(pipeline), store.clone());

        let err = processor.process(event("t1", 1000)).await.unwrap_err();
        match err {
            TrackerError::Processing { task_id, message } => {
                assert_eq!(task_id, "t1");
                assert!(message.contains("second"), "message: {message}");
            }
            other => panic!("expected processing error, got {other:?}"),
        }

        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        assert_eq!(store.get("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failure_is_processing_error() {
        let processor = TaskProcessor::new(
            Arc::new(ProcessingPipeline::empty()),
            Arc::new(FailingStore::new("connection refused")),
        );

        let err = processor.process(event("t9", 5)).await.unwrap_err();
        assert!(matches!(
            &err,
            TrackerError::Processing { task_id, message } if task_id == "t9" && message.contains("connection refused")
        ));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_deadline_bounds_steps_only() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let slow_store = Arc::new(SlowStore::new(store.clone(), Duration::from_millis(100)));
        let processor = TaskProcessor::new(Arc::new(ProcessingPipeline::empty()), slow_store)
            .with_pipeline_deadline(Duration::from_millis(20));

        let response = processor.process(event("t1", 1000)).await.unwrap();
        assert_eq!(response, TaskResponse::ok());

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.total_duration_ms, 1000);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_in_steps_is_not_counted() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let pipeline = ProcessingPipeline::new(
            vec![Box::new(SlowStep::new("slow", Duration::from_millis(150)))],
            1,
        );
        let processor = TaskProcessor::new(Arc::new(pipeline), store.clone())
            .with_pipeline_deadline(Duration::from_millis(10));

        let err = processor.process(event("t1", 1000)).await.unwrap_err();
        assert!(matches!(
            &err,
            TrackerError::Processing { task_id, message } if task_id == "t1" && message.contains("did not finish")
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.get("t1").await.unwrap(), None);
    }
}
