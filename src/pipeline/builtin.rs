//! Builtin processing steps
//!
//! Both steps are stand-ins for real work: one derives a metric from the
//! duration, the other notifies a downstream system.

use super::{ProcessingStep, StepError};
use crate::protocol::TaskEvent;
use tracing::info;

/// Derives a log-scaled duration metric for each event
pub struct MathStep;

impl Default for MathStep {
    fn default() -> Self {
        Self::new()
    }
}

impl MathStep {
    pub fn new() -> Self {
        Self
    }

    /// Natural log of `duration_ms + 1` (pure function)
    pub fn log_scaled(duration_ms: u64) -> f64 {
        (duration_ms as f64 + 1.0).ln()
    }
}

impl ProcessingStep for MathStep {
    fn name(&self) -> &str {
        "math"
    }

    fn execute(&self, event: &TaskEvent) -> Result<(), StepError> {
        let value = Self::log_scaled(event.duration_ms());
        if !value.is_finite() {
            return Err(StepError::failed(format!(
                "non-finite result for duration {}",
                event.duration_ms()
            )));
        }
        info!(task_id = event.task_id(), log_duration = value, "math step computed");
        Ok(())
    }
}

/// Simulated notification to an external system
pub struct ExternalCallStep {
    target: String,
}

impl Default for ExternalCallStep {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalCallStep {
    pub fn new() -> Self {
        Self::with_target("external-system")
    }

    pub fn with_target<S: Into<String>>(target: S) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl ProcessingStep for ExternalCallStep {
    fn name(&self) -> &str {
        "external_call"
    }

    fn execute(&self, event: &TaskEvent) -> Result<(), StepError> {
        info!(
            task_id = event.task_id(),
            target = %self.target,
            "notified external system"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_scaled_values() {
        assert_eq!(MathStep::log_scaled(0), 0.0);
        assert!((MathStep::log_scaled(1000) - 1001f64.ln()).abs() < f64::EPSILON);
        assert!(MathStep::log_scaled(u64::MAX).is_finite());
    }

    #[test]
    fn test_builtin_steps_succeed() {
        let event = TaskEvent::new("t1", 1500).unwrap();
        assert!(MathStep::new().execute(&event).is_ok());
        assert!(ExternalCallStep::new().execute(&event).is_ok());
    }

    #[test]
    fn test_step_names() {
        assert_eq!(MathStep::default().name(), "math");
        assert_eq!(ExternalCallStep::default().name(), "external_call");
    }
}
