//! Processing step pipeline
//!
//! A pipeline is an ordered list of side-effecting steps run against every
//! task event before it is aggregated. Steps run on tokio's blocking worker
//! pool, bounded by a semaphore, so slow steps never stall request intake.
//! The first failing step stops the run.

use crate::config::PipelineSection;
use crate::observability::metrics::metrics;
use crate::protocol::TaskEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn, Instrument};

pub mod builtin;

pub use builtin::{ExternalCallStep, MathStep};

/// A unit of side-effecting work run against a task event
///
/// `execute` may block; it always runs on the blocking worker pool.
pub trait ProcessingStep: Send + Sync {
    /// Step name used in logs, metrics and configuration
    fn name(&self) -> &str;

    fn execute(&self, event: &TaskEvent) -> Result<(), StepError>;
}

/// Failure reported by a single step
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }
}

/// Failure of a whole pipeline run
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("step '{step}' (#{index}) failed: {source}")]
    StepFailed {
        step: String,
        index: usize,
        #[source]
        source: StepError,
    },
    #[error("worker pool unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Ordered, immutable collection of processing steps
pub struct ProcessingPipeline {
    steps: Arc<[Box<dyn ProcessingStep>]>,
    permits: Arc<Semaphore>,
}

impl ProcessingPipeline {
    /// Build a pipeline from steps in execution order
    pub fn new(steps: Vec<Box<dyn ProcessingStep>>, max_concurrent: usize) -> Self {
        Self {
            steps: steps.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Pipeline with no steps; `run` succeeds immediately
    pub fn empty() -> Self {
        Self::new(Vec::new(), 1)
    }

    /// Build a pipeline from configured builtin step names
    pub fn from_config(config: &PipelineSection) -> Result<Self, PipelineConfigError> {
        let steps = config
            .steps
            .iter()
            .map(|name| create_builtin_step(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(steps, config.max_concurrent_steps))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every step against `event` in declared order
    ///
    /// The caller is suspended, not blocked, while the steps execute.
    pub async fn run(&self, event: &TaskEvent) -> Result<(), PipelineError> {
        if self.steps.is_empty() {
            return Ok(());
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::WorkerUnavailable(e.to_string()))?;

        let steps = self.steps.clone();
        let event = event.clone();
        let span = crate::pipeline_span!(task_id = %event.task_id(), steps = steps.len());
        let worker_span = span.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _guard = worker_span.enter();
            run_steps(&steps, &event)
        });

        async move {
            handle
                .await
                .map_err(|e| PipelineError::WorkerUnavailable(e.to_string()))?
        }
        .instrument(span)
        .await
    }
}

/// Execute steps sequentially, stopping at the first failure
fn run_steps(steps: &[Box<dyn ProcessingStep>], event: &TaskEvent) -> Result<(), PipelineError> {
    for (index, step) in steps.iter().enumerate() {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| step.execute(event)))
            .unwrap_or_else(|payload| Err(StepError::Panicked(panic_message(&payload))));
        metrics().step_executed(step.name(), started.elapsed(), result.is_ok());

        match result {
            Ok(()) => debug!(step = step.name(), index, "step completed"),
            Err(source) => {
                warn!(step = step.name(), index, error = %source, "step failed, aborting pipeline");
                return Err(PipelineError::StepFailed {
                    step: step.name().to_string(),
                    index,
                    source,
                });
            }
        }
    }
    Ok(())
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Errors building a pipeline from configuration
#[derive(Debug, Error, PartialEq)]
pub enum PipelineConfigError {
    #[error("Unknown processing step: {0}")]
    UnknownStep(String),
}

/// Create builtin step instances by configured name
pub fn create_builtin_step(name: &str) -> Result<Box<dyn ProcessingStep>, PipelineConfigError> {
    match name {
        "math" => Ok(Box::new(MathStep::new())),
        "external_call" => Ok(Box::new(ExternalCallStep::new())),
        _ => Err(PipelineConfigError::UnknownStep(name.to_string())),
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("steps", &self.step_names())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
