//! Execution events and the listeners that observe them.
//!
//! The state machine reports its progress as [`ExecutionEvent`]s broadcast
//! to every registered [`ExecutionListener`]. Delivery is fire-and-forget:
//! a listener that panics is logged and the remaining listeners still receive
//! the event.

mod listener;

pub use listener::{
    CollectingListener, ExecutionListener, FnListener, ListenerSet, LoggingListener,
};

use crate::core::JobState;
use crate::stages::{FatalExecutionError, StageFailure};
use std::time::Duration;

/// A notification emitted while a job execution runs.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// `run()` began.
    StateMachineStarted,
    /// A pipeline state was entered.
    StateEntered(JobState),
    /// A pipeline state was left, whether attempted or skipped.
    StateExited(JobState),
    /// A state's stage was not attempted because the execution is aborted.
    StateSkipped(JobState),
    /// A stage attempt is about to start.
    BeforeAttempt {
        /// Current state.
        state: JobState,
        /// 1-based attempt number within the state.
        attempt: u32,
    },
    /// A stage attempt returned.
    AfterAttempt {
        /// Current state.
        state: JobState,
        /// 1-based attempt number within the state.
        attempt: u32,
        /// The failure, if the attempt failed.
        failure: Option<StageFailure>,
    },
    /// A critical state failed fatally; the execution is now aborted.
    ExecutionAborted {
        /// The failing state.
        state: JobState,
        /// The abort reason.
        error: FatalExecutionError,
    },
    /// A state stopped being attempted after a fatal failure.
    FatalException {
        /// The failing state.
        state: JobState,
        /// The escalated failure.
        error: FatalExecutionError,
    },
    /// A retry was scheduled after the given delay.
    DelayedRetry {
        /// Current state.
        state: JobState,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// `run()` reached the terminal state.
    StateMachineStopped,
}

impl ExecutionEvent {
    /// Stable kebab-case name of the event kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StateMachineStarted => "state-machine-started",
            Self::StateEntered(_) => "state-entered",
            Self::StateExited(_) => "state-exited",
            Self::StateSkipped(_) => "state-skipped",
            Self::BeforeAttempt { .. } => "before-attempt",
            Self::AfterAttempt { .. } => "after-attempt",
            Self::ExecutionAborted { .. } => "execution-aborted",
            Self::FatalException { .. } => "fatal-exception",
            Self::DelayedRetry { .. } => "delayed-retry",
            Self::StateMachineStopped => "state-machine-stopped",
        }
    }

    /// The state the event refers to, if any.
    #[must_use]
    pub const fn state(&self) -> Option<JobState> {
        match self {
            Self::StateMachineStarted | Self::StateMachineStopped => None,
            Self::StateEntered(state) | Self::StateExited(state) | Self::StateSkipped(state) => {
                Some(*state)
            }
            Self::BeforeAttempt { state, .. }
            | Self::AfterAttempt { state, .. }
            | Self::ExecutionAborted { state, .. }
            | Self::FatalException { state, .. }
            | Self::DelayedRetry { state, .. } => Some(*state),
        }
    }
}
