//! Job status as seen by the server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a job on the server side.
///
/// Stages move the job through these statuses by talking to the server; the
/// state machine itself only carries them in the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job id reserved, specification not yet resolved.
    Reserved,
    /// Specification resolved by the server.
    Resolved,
    /// Job accepted, waiting to be claimed by an agent.
    Accepted,
    /// Job claimed by this agent.
    Claimed,
    /// Job directory and dependencies being set up.
    Init,
    /// Job process running.
    Running,
    /// Job completed successfully.
    Succeeded,
    /// Job was killed.
    Killed,
    /// Job failed.
    Failed,
    /// Placeholder before any status is known.
    #[default]
    Invalid,
}

impl JobStatus {
    /// Returns true if the status is final and can no longer change.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Killed | Self::Failed | Self::Invalid)
    }

    /// Returns true if the job is claimed by an agent and not yet finished.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Claimed | Self::Init | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reserved => "RESERVED",
            Self::Resolved => "RESOLVED",
            Self::Accepted => "ACCEPTED",
            Self::Claimed => "CLAIMED",
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Killed => "KILLED",
            Self::Failed => "FAILED",
            Self::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        assert_eq!(JobStatus::default(), JobStatus::Invalid);
    }

    #[test]
    fn test_finished_and_active() {
        assert!(JobStatus::Succeeded.is_finished());
        assert!(JobStatus::Killed.is_finished());
        assert!(JobStatus::Failed.is_finished());
        assert!(!JobStatus::Running.is_finished());

        assert!(JobStatus::Claimed.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Reserved.is_active());
        assert!(!JobStatus::Failed.is_active());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, r#""RUNNING""#);

        let deserialized: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, JobStatus::Running);
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
    }
}
