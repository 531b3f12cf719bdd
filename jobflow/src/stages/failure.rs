//! Stage failure taxonomy and its escalation rules.

use crate::core::JobState;
use crate::errors::StatusServiceError;
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// A shareable error cause attached to failures and records.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Wraps any error into a [`Cause`].
pub fn into_cause<E>(error: E) -> Cause
where
    E: Into<anyhow::Error>,
{
    let error: anyhow::Error = error.into();
    let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
    Arc::from(boxed)
}

/// The ways a stage attempt can fail.
#[derive(Debug, Clone, Error)]
pub enum StageFailure {
    /// Transient condition; the attempt may succeed if repeated.
    #[error("{message}")]
    Retryable {
        /// Description of the failure.
        message: String,
        /// Underlying error, if any.
        #[source]
        cause: Option<Cause>,
    },

    /// Unrecoverable condition for the current state.
    #[error("{message}")]
    Fatal {
        /// Description of the failure.
        message: String,
        /// Underlying error, if any.
        #[source]
        cause: Option<Cause>,
    },

    /// An error the stage did not classify. Always escalated as fatal.
    #[error("{0}")]
    Unexpected(#[source] Cause),
}

impl StageFailure {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a retryable failure with an underlying cause.
    pub fn retryable_with<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Retryable {
            message: message.into(),
            cause: Some(into_cause(cause)),
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a fatal failure with an underlying cause.
    pub fn fatal_with<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Fatal {
            message: message.into(),
            cause: Some(into_cause(cause)),
        }
    }

    /// Wraps an unclassified error.
    pub fn unexpected<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Unexpected(into_cause(error))
    }

    /// Builds an unexpected failure from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Unexpected(Arc::new(StagePanic(message)))
    }

    /// Returns true for [`StageFailure::Retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Short kind label used in logs and reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Retryable { .. } => "retryable",
            Self::Fatal { .. } => "fatal",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

impl From<anyhow::Error> for StageFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::unexpected(error)
    }
}

impl From<std::io::Error> for StageFailure {
    fn from(error: std::io::Error) -> Self {
        Self::unexpected(error)
    }
}

impl From<StatusServiceError> for StageFailure {
    fn from(error: StatusServiceError) -> Self {
        let message = error.to_string();
        if error.is_transient() {
            Self::retryable_with(message, error)
        } else {
            Self::fatal_with(message, error)
        }
    }
}

/// A panic caught while a stage attempt was running.
#[derive(Debug, Clone, Error)]
#[error("stage panicked: {0}")]
pub struct StagePanic(pub String);

/// A failure that ended all attempts at a state.
#[derive(Debug, Clone, Error)]
#[error("Fatal error in state {state}: {message}")]
pub struct FatalExecutionError {
    /// The state whose stage failed.
    pub state: JobState,
    /// Description of the failure.
    pub message: String,
    /// The failure (or error) this one was escalated from.
    #[source]
    pub cause: Option<Cause>,
}

impl FatalExecutionError {
    /// Creates a new fatal execution error.
    #[must_use]
    pub fn new(state: JobState, message: impl Into<String>, cause: Option<Cause>) -> Self {
        Self {
            state,
            message: message.into(),
            cause,
        }
    }
}

/// What the state machine does with a failed attempt.
#[derive(Debug, Clone)]
pub enum Escalation {
    /// Attempt the stage again after a backoff delay.
    Retry,
    /// Stop attempting this state.
    Fatal(FatalExecutionError),
}

/// Classifies a failed attempt given the attempts left for the current state.
#[must_use]
pub fn classify(state: JobState, failure: &StageFailure, attempts_left: u32) -> Escalation {
    match failure {
        StageFailure::Retryable { .. } if attempts_left > 0 => Escalation::Retry,
        StageFailure::Retryable { .. } => Escalation::Fatal(FatalExecutionError::new(
            state,
            format!("No attempts left for retryable error in state {state}"),
            Some(Arc::new(failure.clone())),
        )),
        StageFailure::Fatal { message, cause } => {
            Escalation::Fatal(FatalExecutionError::new(state, message.clone(), cause.clone()))
        }
        StageFailure::Unexpected(cause) => Escalation::Fatal(FatalExecutionError::new(
            state,
            format!("Unhandled error in state {state}: {cause}"),
            Some(cause.clone()),
        )),
    }
}
