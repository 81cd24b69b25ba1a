//! Error taxonomy for the task aggregation service
//!
//! Every operation in the workflow core returns a [`TrackerError`]. Adapters
//! translate it into their own wire form; the HTTP adapter uses
//! [`TrackerError::to_error_response`].

use crate::protocol::messages::{ErrorCode, ErrorResponse};
use crate::protocol::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Main error type for task aggregation operations
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Malformed or missing task event fields
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// Average requested for a task with no aggregate record
    #[error("Given task is not found: {task_id}")]
    NotFound { task_id: String },

    /// Pipeline step or store failure while processing an event
    #[error("Failed to process task {task_id}: {message}")]
    Processing { task_id: String, message: String },

    /// Absent context or unrecognized workflow selector reached the dispatcher
    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TrackerError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create not-found error
    pub fn not_found<S: Into<String>>(task_id: S) -> Self {
        Self::NotFound {
            task_id: task_id.into(),
        }
    }

    /// Create processing error carrying the originating task and cause
    pub fn processing<S: Into<String>, E: std::fmt::Display>(task_id: S, cause: E) -> Self {
        Self::Processing {
            task_id: task_id.into(),
            message: cause.to_string(),
        }
    }

    /// Create contract violation error
    pub fn contract_violation<S: Into<String>>(message: S) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// Error code reported to clients
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TrackerError::Validation { .. } => ErrorCode::ValidationError,
            TrackerError::NotFound { .. } => ErrorCode::RecordNotFound,
            TrackerError::Processing { .. } => ErrorCode::ProcessingError,
            TrackerError::ContractViolation { .. } => ErrorCode::ContractViolation,
            TrackerError::Config(_) | TrackerError::Transport(_) => ErrorCode::ProcessingError,
        }
    }

    /// HTTP status an adapter should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            TrackerError::Validation { .. } => 400,
            TrackerError::NotFound { .. } => 404,
            TrackerError::Processing { .. }
            | TrackerError::ContractViolation { .. }
            | TrackerError::Config(_)
            | TrackerError::Transport(_) => 500,
        }
    }

    /// Convert into the client-facing error body
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            message: sanitize_error_message(&self.to_string()),
            error_code: self.error_code().code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status_code: self.status_code(),
        }
    }
}

impl From<ValidationError> for TrackerError {
    fn from(err: ValidationError) -> Self {
        TrackerError::validation(err.to_string())
    }
}

/// Redact secrets and sensitive paths, and bound the message length
fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_carries_task_id_and_cause() {
        let error = TrackerError::processing("t1", "step 'math' failed");
        assert!(matches!(
            &error,
            TrackerError::Processing { task_id, message } if task_id == "t1" && message == "step 'math' failed"
        ));
        assert_eq!(
            error.to_string(),
            "Failed to process task t1: step 'math' failed"
        );
    }

    #[test]
    fn test_error_response_mapping() {
        let cases = vec![
            (TrackerError::validation("bad"), 400, 1003),
            (TrackerError::not_found("ghost"), 404, 1002),
            (TrackerError::processing("t1", "boom"), 500, 1001),
            (TrackerError::contract_violation("no context"), 500, 1004),
        ];

        for (error, status, code) in cases {
            let response = error.to_error_response();
            assert_eq!(response.status_code, status, "status for {error}");
            assert_eq!(response.error_code, code, "code for {error}");
            assert_eq!(response.message, error.to_string());
        }
    }

    #[test]
    fn test_error_response_timestamp_is_rfc3339() {
        let response = TrackerError::not_found("t1").to_error_response();
        assert!(chrono::DateTime::parse_from_rfc3339(&response.timestamp).is_ok());
    }

    #[test]
    fn test_validation_error_conversion() {
        let error: TrackerError = ValidationError::EmptyTaskId.into();
        assert!(matches!(error, TrackerError::Validation { .. }));
        assert_eq!(error.to_string(), "Invalid input: Task ID cannot be empty");
    }

    #[test]
    fn test_error_message_sanitization() {
        let error = TrackerError::processing("t1", "store login failed: password=secret123");
        let response = error.to_error_response();

        assert!(!response.message.contains("secret123"));
        assert!(response.message.contains("password=***"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized = sanitize_error_message("Failed to read /home/user/.ssh/id_rsa");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_limit() {
        let message = "x".repeat(MAX_ERROR_MESSAGE_LEN);
        assert_eq!(sanitize_error_message(&message), message);
    }
}
