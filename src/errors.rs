//! Typed error taxonomy for the DAG execution core.

use std::collections::BTreeMap;
use thiserror::Error;

/// Static, pre-run problems with a pipeline definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("step name '{0}' is empty")]
    EmptyName(String),
    #[error("duplicate step name '{0}'")]
    DuplicateName(String),
    #[error("step '{step}' references unknown plugin '{plugin}'")]
    UnknownPlugin { step: String, plugin: String },
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("dependency cycle detected involving step '{0}'")]
    Cycle(String),
    #[error(
        "critical step '{step}' (fail_on_error=true) depends on non-critical step '{dependency}'"
    )]
    CriticalDependsOnNonCritical { step: String, dependency: String },
    #[error("param '{0}' declares unknown type '{1}'")]
    UnknownParamType(String, String),
}

/// A step's inputs could not be produced; terminal, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("required field '{field}' for step '{step}' could not be resolved")]
    MissingRequiredField { step: String, field: String },
    #[error("connection source '{0}' did not resolve to a value")]
    UnresolvedConnection(String),
    #[error("plugin '{0}' rejected its input: {1}")]
    RejectedByPlugin(String, String),
}

/// Outcome classification for one plugin invocation attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin '{plugin}' failed: {message}")]
    Fatal { plugin: String, message: String },
    #[error("plugin '{plugin}' produced an output that failed validation: {message}")]
    InvalidOutput { plugin: String, message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transient failure in plugin '{plugin}': {message}")]
pub struct RetryableError {
    pub plugin: String,
    pub message: String,
}

/// Data carried by a cooperative suspension request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SuspendInfo {
    pub reason: String,
    pub data: BTreeMap<String, serde_json::Value>,
}

/// A `fail_on_error=true` step failed terminally; aborts further
/// normal-phase scheduling.
#[derive(Debug, Error, Clone)]
#[error("critical step '{step}' failed: {source}")]
pub struct DagExecutionError {
    pub step: String,
    #[source]
    pub source: StepFailure,
}

/// Any terminal failure kind a step can end in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Retryable(#[from] RetryableError),
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the checkpoint subsystem.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("no checkpoint found for task '{0}'")]
    NotFound(String),
    #[error("checkpoint references step(s) removed from the current pipeline definition: {0:?}")]
    RemovedSteps(Vec<String>),
    #[error("a resume is already in progress for task '{0}'")]
    ResumeInProgress(String),
    #[error("io error while handling checkpoint: {0}")]
    Io(String),
    #[error("failed to (de)serialize checkpoint: {0}")]
    Serde(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serde(e.to_string())
    }
}

/// Aggregate container for a normal-phase error and/or finally-phase errors.
#[derive(Debug, Error, Clone)]
pub struct PipelineExecutionError {
    pub normal_phase_error: Option<Box<DagExecutionError>>,
    pub finally_phase_errors: Vec<(String, StepFailure)>,
}

impl std::fmt::Display for PipelineExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline execution failed")?;
        if let Some(e) = &self.normal_phase_error {
            write!(f, "; normal phase: {e}")?;
        }
        for (step, err) in &self.finally_phase_errors {
            write!(f, "; finally '{step}': {err}")?;
        }
        Ok(())
    }
}

impl PipelineExecutionError {
    pub fn is_empty(&self) -> bool {
        self.normal_phase_error.is_none() && self.finally_phase_errors.is_empty()
    }
}

/// Cooperative suspension; not an error condition, but shares the error
/// channel so the scheduler can short-circuit the run with `?`.
#[derive(Debug, Error, Clone)]
#[error("pipeline suspended at step(s): {suspended_steps:?}")]
pub struct PipelineSuspended {
    pub suspended_steps: Vec<String>,
    pub checkpoint_id: String,
}
