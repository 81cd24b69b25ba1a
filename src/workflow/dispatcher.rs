use super::{AverageCalculator, TaskProcessor};
use crate::error::{TrackerError, TrackerResult};
use crate::observability::metrics::metrics;
use crate::protocol::{ProcessingOutcome, TaskContext, WorkflowSelector};
use tracing::warn;

/// Routes a [`TaskContext`] to the operation its selector names
#[derive(Clone)]
pub struct WorkflowDispatcher {
    processor: TaskProcessor,
    calculator: AverageCalculator,
}

impl WorkflowDispatcher {
    pub fn new(processor: TaskProcessor, calculator: AverageCalculator) -> Self {
        Self {
            processor,
            calculator,
        }
    }

    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    pub fn with_pipeline_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.processor = self.processor.with_pipeline_deadline(deadline);
        self
    }

    /// Dispatch one context
    ///
    /// An absent context is rejected before anything else is inspected.
    /// `InvalidWorkflow` is never routed.
    pub async fn dispatch(&self, context: Option<TaskContext>) -> TrackerResult<ProcessingOutcome> {
        let Some(context) = context else {
            return Err(violation("task context is required".to_string()));
        };

        match context.workflow() {
            WorkflowSelector::ProcessTask => self
                .processor
                .process(context.into_event())
                .await
                .map(ProcessingOutcome::Acknowledged),
            WorkflowSelector::CalculateAverage => self
                .calculator
                .compute_average(context.event().task_id())
                .await
                .map(ProcessingOutcome::Average),
            WorkflowSelector::InvalidWorkflow => Err(violation(format!(
                "unsupported workflow {} for task {}",
                context.workflow(),
                context.event().task_id()
            ))),
        }
    }
}

fn violation(message: String) -> TrackerError {
    warn!(%message, "rejected dispatch");
    metrics().contract_violation();
    TrackerError::contract_violation(message)
}
