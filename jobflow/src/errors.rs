//! Error types for the jobflow crate.
//!
//! Stage failures are not errors of the state machine: they are absorbed and
//! recorded in the execution context (see [`crate::stages::StageFailure`]).
//! The types here cover misuse of the API and failures of collaborators.

use crate::core::JobState;
use thiserror::Error;

/// The main error type for jobflow operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The state machine (or its context) was already started.
    #[error("Execution already started: a job execution context can only be run once")]
    AlreadyStarted,

    /// The pipeline definition is invalid.
    #[error("{0}")]
    InvalidPipeline(#[from] PipelineValidationError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised when a pipeline or state table fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The states involved in the error.
    pub states: Vec<JobState>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            states: Vec::new(),
        }
    }

    /// Sets the states involved.
    #[must_use]
    pub fn with_states(mut self, states: Vec<JobState>) -> Self {
        self.states = states;
        self
    }
}

/// Errors returned by the remote job status service.
#[derive(Debug, Clone, Error)]
pub enum StatusServiceError {
    /// The server could not be reached or timed out; worth retrying.
    #[error("Transient status service error: {0}")]
    Transient(String),

    /// The server refused the status change (e.g. the job was already finalized).
    #[error("Status change rejected: {0}")]
    Rejected(String),
}

impl StatusServiceError {
    /// Returns true if the request may succeed when attempted again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
