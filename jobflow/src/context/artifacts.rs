//! Artifacts produced by stages and stored in the execution context.

use crate::core::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The job specification resolved by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpecification {
    /// The job id.
    pub job_id: String,
    /// Command line of the job process.
    pub command_args: Vec<String>,
    /// Environment variables exported to the job process.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Parent directory under which the job directory is created.
    pub job_directory_location: PathBuf,
    /// Whether the job is interactive (attached to the agent's console).
    #[serde(default)]
    pub interactive: bool,
    /// Maximum run time in seconds, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl JobSpecification {
    /// Creates a specification with the given id and command.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        command_args: Vec<String>,
        job_directory_location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            command_args,
            environment: HashMap::new(),
            job_directory_location: job_directory_location.into(),
            interactive: false,
            timeout_seconds: None,
        }
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// The directory the job runs in.
    #[must_use]
    pub fn job_directory(&self) -> PathBuf {
        self.job_directory_location.join(&self.job_id)
    }
}

/// Handle to a launched job process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// OS process id.
    pub pid: u32,
}

/// Outcome of the job process, derived from its exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// The final job status implied by the exit.
    pub final_status: JobStatus,
    /// Human-readable status message.
    pub final_status_message: String,
    /// Exit code, if the process exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ProcessResult {
    /// Builds a result from an exit code.
    #[must_use]
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self {
                final_status: JobStatus::Succeeded,
                final_status_message: "Job finished successfully".to_string(),
                exit_code: Some(exit_code),
            }
        } else {
            Self {
                final_status: JobStatus::Failed,
                final_status_message: format!("Job failed with exit code {exit_code}"),
                exit_code: Some(exit_code),
            }
        }
    }
}

/// What to remove from the job directory once the job is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupStrategy {
    /// Remove downloaded dependencies, keep outputs.
    #[default]
    DependenciesCleanup,
    /// Remove the whole job directory.
    FullCleanup,
    /// Leave everything in place.
    NoCleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_directory() {
        let spec = JobSpecification::new("job-1", vec!["echo".into()], "/tmp/jobs");
        assert_eq!(spec.job_directory(), PathBuf::from("/tmp/jobs/job-1"));
    }

    #[test]
    fn test_process_result_from_exit_code() {
        let ok = ProcessResult::from_exit_code(0);
        assert_eq!(ok.final_status, JobStatus::Succeeded);

        let failed = ProcessResult::from_exit_code(137);
        assert_eq!(failed.final_status, JobStatus::Failed);
        assert!(failed.final_status_message.contains("137"));
    }

    #[test]
    fn test_specification_deserialize_defaults() {
        let spec: JobSpecification = serde_json::from_str(
            r#"{"job_id":"j","command_args":["ls"],"job_directory_location":"/tmp"}"#,
        )
        .unwrap();

        assert!(spec.environment.is_empty());
        assert!(!spec.interactive);
        assert_eq!(spec.timeout_seconds, None);
    }

    #[test]
    fn test_cleanup_strategy_default() {
        assert_eq!(CleanupStrategy::default(), CleanupStrategy::DependenciesCleanup);
    }
}
