//! Input validation and topic canonicalization
//!
//! Every task event entering the service passes through these checks, whether
//! it came in over HTTP or was delivered from the message queue.

use thiserror::Error;

/// Upper bound on task identifier length accepted from adapters
pub const MAX_TASK_ID_LEN: usize = 256;

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    // Single leading slash
    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    // Collapse consecutive slashes
    while result.contains("//") {
        result = result.replace("//", "/");
    }

    // No trailing slash except for root
    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Validate a task identifier: non-blank, bounded length, no control characters
pub fn validate_task_id(task_id: &str) -> Result<(), ValidationError> {
    if task_id.trim().is_empty() {
        return Err(ValidationError::EmptyTaskId);
    }

    if task_id.len() > MAX_TASK_ID_LEN {
        return Err(ValidationError::TaskIdTooLong {
            len: task_id.len(),
            max: MAX_TASK_ID_LEN,
        });
    }

    if let Some(ch) = task_id.chars().find(|c| c.is_control()) {
        return Err(ValidationError::InvalidTaskIdChar(ch));
    }

    Ok(())
}

/// Validate a raw (signed) duration coming from an untyped source
pub fn validate_duration(duration_ms: i64) -> Result<u64, ValidationError> {
    u64::try_from(duration_ms).map_err(|_| ValidationError::NegativeDuration(duration_ms))
}

/// Validate the service identifier used for MQTT client ids and health output
pub fn validate_service_id(service_id: &str) -> Result<(), ValidationError> {
    if service_id.is_empty() {
        return Err(ValidationError::EmptyServiceId);
    }

    for ch in service_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidServiceIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for inbound task data
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Task ID cannot be empty")]
    EmptyTaskId,
    #[error("Task ID is {len} bytes, maximum is {max}")]
    TaskIdTooLong { len: usize, max: usize },
    #[error("Task ID contains invalid character: {0:?}")]
    InvalidTaskIdChar(char),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Duration must be non-negative, got {0}")]
    NegativeDuration(i64),
    #[error("Service ID cannot be empty")]
    EmptyServiceId,
    #[error("Service ID contains invalid character: '{0}'")]
    InvalidServiceIdChar(char),
}
