//! Job execution states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A position in the job execution pipeline.
///
/// `Ready` and `Done` are pseudo-states that carry no stage: the context sits
/// in `Ready` until the state machine starts and in `Done` once it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Initial pseudo-state.
    Ready,
    /// Agent initialization (identity, handshake with the server).
    Initialize,
    /// Execution configuration.
    Configure,
    /// Job specification resolution.
    ResolveSpec,
    /// Job directory and dependency setup.
    Setup,
    /// Job process launch.
    Launch,
    /// Monitoring of the running job process.
    Monitor,
    /// Post-execution cleanup.
    Cleanup,
    /// Error-handling tail, active only after a fatal abort.
    HandleError,
    /// Final status update and release of agent resources.
    Shutdown,
    /// Terminal pseudo-state.
    Done,
}

impl JobState {
    /// Every state, in pipeline order, including the pseudo-states.
    pub const ALL: [Self; 11] = [
        Self::Ready,
        Self::Initialize,
        Self::Configure,
        Self::ResolveSpec,
        Self::Setup,
        Self::Launch,
        Self::Monitor,
        Self::Cleanup,
        Self::HandleError,
        Self::Shutdown,
        Self::Done,
    ];

    /// The states that carry a stage, in the order the state machine visits them.
    pub const PIPELINE: [Self; 9] = [
        Self::Initialize,
        Self::Configure,
        Self::ResolveSpec,
        Self::Setup,
        Self::Launch,
        Self::Monitor,
        Self::Cleanup,
        Self::HandleError,
        Self::Shutdown,
    ];

    /// Returns true for `Ready` and `Done`.
    #[must_use]
    pub const fn is_pseudo_state(self) -> bool {
        matches!(self, Self::Ready | Self::Done)
    }

    /// Canonical upper-case name, as used in logs and configuration keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Initialize => "INITIALIZE",
            Self::Configure => "CONFIGURE",
            Self::ResolveSpec => "RESOLVE_SPEC",
            Self::Setup => "SETUP",
            Self::Launch => "LAUNCH",
            Self::Monitor => "MONITOR",
            Self::Cleanup => "CLEANUP",
            Self::HandleError => "HANDLE_ERROR",
            Self::Shutdown => "SHUTDOWN",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| format!("unknown job state '{s}'"))
    }
}
