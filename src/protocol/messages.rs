//! Message types for task aggregation
//!
//! This module defines the task event ingested from adapters, the context the
//! dispatcher routes on, the aggregate record owned by the store, and the
//! response bodies returned to callers.

use super::validation::{validate_duration, validate_task_id, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One reported occurrence of a task taking a given duration
///
/// A `TaskEvent` can only be built through [`TaskEvent::new`] or by
/// deserializing a payload, and both paths run the same validation, so a
/// value of this type always has a non-blank identifier.
///
/// # Examples
/// ```
/// use task_aggregator::protocol::TaskEvent;
///
/// let event = TaskEvent::new("task-123", 1000).unwrap();
/// assert_eq!(event.task_id(), "task-123");
/// assert_eq!(event.duration_ms(), 1000);
///
/// let json = serde_json::to_string(&event).unwrap();
/// assert_eq!(json, r#"{"taskId":"task-123","durationMs":1000}"#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "TaskEventPayload", rename_all = "camelCase")]
pub struct TaskEvent {
    task_id: String,
    duration_ms: u64,
}

impl TaskEvent {
    /// Create a validated task event
    pub fn new(task_id: impl Into<String>, duration_ms: u64) -> Result<Self, ValidationError> {
        let task_id = task_id.into();
        validate_task_id(&task_id)?;
        Ok(Self {
            task_id,
            duration_ms,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// Untyped inbound payload, validated into a [`TaskEvent`]
///
/// `totalDurationMs` is accepted as an alias since older producers used that
/// field name on the queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventPayload {
    pub task_id: Option<String>,
    #[serde(alias = "totalDurationMs")]
    pub duration_ms: Option<i64>,
}

impl TryFrom<TaskEventPayload> for TaskEvent {
    type Error = ValidationError;

    fn try_from(payload: TaskEventPayload) -> Result<Self, Self::Error> {
        let task_id = payload
            .task_id
            .ok_or(ValidationError::MissingField("taskId"))?;
        let duration = payload
            .duration_ms
            .ok_or(ValidationError::MissingField("durationMs"))?;
        TaskEvent::new(task_id, validate_duration(duration)?)
    }
}

/// Tag selecting which operation handles a [`TaskContext`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowSelector {
    ProcessTask,
    CalculateAverage,
    /// Sentinel for unrecognized selectors; always rejected by the dispatcher
    InvalidWorkflow,
}

impl WorkflowSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowSelector::ProcessTask => "PROCESS_TASK",
            WorkflowSelector::CalculateAverage => "CALCULATE_AVERAGE",
            WorkflowSelector::InvalidWorkflow => "INVALID_WORKFLOW",
        }
    }
}

impl fmt::Display for WorkflowSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request routing context handed to the dispatcher
///
/// Both the HTTP handler and the queue consumer build contexts through these
/// constructors, so the dispatcher cannot tell the two paths apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    event: TaskEvent,
    workflow: WorkflowSelector,
}

impl TaskContext {
    pub fn new(event: TaskEvent, workflow: WorkflowSelector) -> Self {
        Self { event, workflow }
    }

    /// Context for folding `event` into its aggregate
    pub fn process_task(event: TaskEvent) -> Self {
        Self::new(event, WorkflowSelector::ProcessTask)
    }

    /// Context for reading the average of `task_id`
    pub fn calculate_average(task_id: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self::new(
            TaskEvent::new(task_id, 0)?,
            WorkflowSelector::CalculateAverage,
        ))
    }

    pub fn event(&self) -> &TaskEvent {
        &self.event
    }

    pub fn workflow(&self) -> WorkflowSelector {
        self.workflow
    }

    pub fn into_event(self) -> TaskEvent {
        self.event
    }
}

/// Accumulated total duration and occurrence count for one task identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub task_id: String,
    pub total_duration_ms: u64,
    pub count: u64,
}

impl AggregateRecord {
    /// Floored average, `None` for an empty record
    pub fn average_ms(&self) -> Option<u64> {
        self.total_duration_ms.checked_div(self.count)
    }
}

/// Acknowledgement returned after a task event was aggregated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskResponse {
    pub status: String,
}

impl TaskResponse {
    pub const OK: &'static str = "OK";
    pub const ACCEPTED: &'static str = "ACCEPTED";

    pub fn ok() -> Self {
        Self {
            status: Self::OK.to_string(),
        }
    }

    /// Event was handed to the queue for asynchronous processing
    pub fn accepted() -> Self {
        Self {
            status: Self::ACCEPTED.to_string(),
        }
    }
}

/// Average duration for one task identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AverageResult {
    pub task_id: String,
    pub average_duration_ms: u64,
}

/// Successful result of a dispatched workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProcessingOutcome {
    Acknowledged(TaskResponse),
    Average(AverageResult),
}

/// Error codes carried in [`ErrorResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ProcessingError,
    RecordNotFound,
    ValidationError,
    ContractViolation,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::ProcessingError => 1001,
            ErrorCode::RecordNotFound => 1002,
            ErrorCode::ValidationError => 1003,
            ErrorCode::ContractViolation => 1004,
        }
    }
}

/// Error body returned by the HTTP adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
    pub error_code: u16,
    /// ISO-8601 timestamp of when the error was produced
    pub timestamp: String,
    pub status_code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_event_new_validates_id() {
        assert!(TaskEvent::new("t1", 1000).is_ok());
        assert_eq!(TaskEvent::new("", 1000), Err(ValidationError::EmptyTaskId));
        assert_eq!(TaskEvent::new("  ", 5), Err(ValidationError::EmptyTaskId));
    }

    #[test]
    fn test_task_event_deserialize() {
        let event: TaskEvent =
            serde_json::from_value(json!({"taskId": "t1", "durationMs": 1500})).unwrap();
        assert_eq!(event.task_id(), "t1");
        assert_eq!(event.duration_ms(), 1500);
    }

    #[test]
    fn test_task_event_accepts_legacy_field_name() {
        let event: TaskEvent =
            serde_json::from_value(json!({"taskId": "t1", "totalDurationMs": 42})).unwrap();
        assert_eq!(event.duration_ms(), 42);
    }

    #[test]
    fn test_task_event_rejects_negative_duration() {
        let result: Result<TaskEvent, _> =
            serde_json::from_value(json!({"taskId": "t1", "durationMs": -1}));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("non-negative"), "unexpected error: {err}");
    }

    #[test]
    fn test_task_event_rejects_missing_fields() {
        let missing_id: Result<TaskEvent, _> = serde_json::from_value(json!({"durationMs": 1}));
        assert!(missing_id.unwrap_err().to_string().contains("taskId"));

        let missing_duration: Result<TaskEvent, _> = serde_json::from_value(json!({"taskId": "a"}));
        assert!(missing_duration
            .unwrap_err()
            .to_string()
            .contains("durationMs"));
    }

    #[test]
    fn test_task_event_rejects_blank_id() {
        let result: Result<TaskEvent, _> =
            serde_json::from_value(json!({"taskId": "", "durationMs": 10}));
        assert!(result.is_err());
    }

    #[test]
    fn test_context_constructors() {
        let event = TaskEvent::new("t1", 10).unwrap();
        let ctx = TaskContext::process_task(event.clone());
        assert_eq!(ctx.workflow(), WorkflowSelector::ProcessTask);
        assert_eq!(ctx.event(), &event);

        let ctx = TaskContext::calculate_average("t1").unwrap();
        assert_eq!(ctx.workflow(), WorkflowSelector::CalculateAverage);
        assert_eq!(ctx.event().task_id(), "t1");
        assert_eq!(ctx.event().duration_ms(), 0);

        assert!(TaskContext::calculate_average("").is_err());
    }

    #[test]
    fn test_workflow_selector_serialization() {
        assert_eq!(
            serde_json::to_string(&WorkflowSelector::ProcessTask).unwrap(),
            "\"PROCESS_TASK\""
        );
        assert_eq!(
            WorkflowSelector::InvalidWorkflow.to_string(),
            "INVALID_WORKFLOW"
        );
    }

    #[test]
    fn test_aggregate_record_average_floors() {
        let record = AggregateRecord {
            task_id: "t".to_string(),
            total_duration_ms: 10,
            count: 3,
        };
        assert_eq!(record.average_ms(), Some(3));

        let empty = AggregateRecord {
            task_id: "t".to_string(),
            total_duration_ms: 0,
            count: 0,
        };
        assert_eq!(empty.average_ms(), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let ack = ProcessingOutcome::Acknowledged(TaskResponse::ok());
        assert_eq!(serde_json::to_value(&ack).unwrap(), json!({"status": "OK"}));

        let avg = ProcessingOutcome::Average(AverageResult {
            task_id: "t1".to_string(),
            average_duration_ms: 1500,
        });
        assert_eq!(
            serde_json::to_value(&avg).unwrap(),
            json!({"taskId": "t1", "averageDurationMs": 1500})
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::ProcessingError.code(), 1001);
        assert_eq!(ErrorCode::RecordNotFound.code(), 1002);
        assert_eq!(ErrorCode::ValidationError.code(), 1003);
        assert_eq!(ErrorCode::ContractViolation.code(), 1004);
    }
}
