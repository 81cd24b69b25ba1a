use super::{AverageCalculator, TaskProcessor, WorkflowDispatcher};
use crate::error::{TrackerError, TrackerResult};
use crate::observability::HealthState;
use crate::pipeline::ProcessingPipeline;
use crate::protocol::{AverageResult, ProcessingOutcome, TaskContext, TaskEvent, TaskResponse};
use crate::store::AggregateStore;
use std::sync::Arc;
use std::time::Duration;

/// Entry point shared by every adapter
///
/// Cheap to clone; clones share the same store, pipeline and health state.
#[derive(Clone)]
pub struct TaskService {
    dispatcher: WorkflowDispatcher,
    store: Arc<dyn AggregateStore>,
    health: Option<Arc<HealthState>>,
}

impl TaskService {
    pub fn new(store: Arc<dyn AggregateStore>, pipeline: ProcessingPipeline) -> Self {
        let dispatcher = WorkflowDispatcher::new(
            TaskProcessor::new(Arc::new(pipeline), store.clone()),
            AverageCalculator::new(store.clone()),
        );
        Self {
            dispatcher,
            store,
            health: None,
        }
    }

    /// Record processed events on `health`
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Bound the processing steps of every submitted event
    pub fn with_pipeline_deadline(mut self, deadline: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_pipeline_deadline(deadline);
        self
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &ProcessingPipeline {
        self.dispatcher.processor().pipeline()
    }

    /// Dispatch a context built by an adapter
    #[tracing::instrument(
        name = "handle",
        skip(self, context),
        fields(task_id = %context.event().task_id(), workflow = %context.workflow())
    )]
    pub async fn handle(&self, context: TaskContext) -> TrackerResult<ProcessingOutcome> {
        let outcome = self.dispatcher.dispatch(Some(context)).await?;
        if let (ProcessingOutcome::Acknowledged(_), Some(health)) = (&outcome, &self.health) {
            health.mark_event_processed();
        }
        Ok(outcome)
    }

    /// Fold one event into its aggregate
    pub async fn submit_task_event(&self, event: TaskEvent) -> TrackerResult<TaskResponse> {
        match self.handle(TaskContext::process_task(event)).await? {
            ProcessingOutcome::Acknowledged(response) => Ok(response),
            ProcessingOutcome::Average(_) => Err(TrackerError::contract_violation(
                "task processing produced an average",
            )),
        }
    }

    /// Average duration of every event seen for `task_id`
    pub async fn request_average(&self, task_id: &str) -> TrackerResult<AverageResult> {
        let context = TaskContext::calculate_average(task_id)?;
        match self.handle(context).await? {
            ProcessingOutcome::Average(result) => Ok(result),
            ProcessingOutcome::Acknowledged(_) => Err(TrackerError::contract_violation(
                "average request produced an acknowledgement",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAggregateStore;

    fn service() -> TaskService {
        TaskService::new(
            Arc::new(InMemoryAggregateStore::new()),
            ProcessingPipeline::empty(),
        )
    }

    #[tokio::test]
    async fn test_submit_then_average() {
        let service = service();
        service
            .submit_task_event(TaskEvent::new("t1", 1000).unwrap())
            .await
            .unwrap();
        service
            .submit_task_event(TaskEvent::new("t1", 2000).unwrap())
            .await
            .unwrap();

        let result = service.request_average("t1").await.unwrap();
        assert_eq!(result.average_duration_ms, 1500);
    }

    #[tokio::test]
    async fn test_blank_average_request_is_validation_error() {
        let err = service().request_average("  ").await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_processed_event_marks_health() {
        let health = Arc::new(HealthState::new("svc", "in_memory", false));
        let service = service().with_health(health.clone());

        service
            .submit_task_event(TaskEvent::new("t1", 10).unwrap())
            .await
            .unwrap();
        let report = health.report();
        assert!(report.is_healthy());
        assert_eq!(
            report.checks["event_processing"].message,
            "Recent event activity"
        );
    }
}
