//! Serializable summary of a finished job execution.

use super::StateTimingListener;
use crate::cancellation::KillSource;
use crate::context::ExecutionContext;
use crate::core::{JobState, JobStatus};
use crate::errors::AgentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why the execution was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    /// The critical state that failed.
    pub state: JobState,
    /// Description of the failure.
    pub message: String,
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// State whose stage failed.
    pub state: JobState,
    /// 1-based attempt number.
    pub attempt: u32,
    /// `retryable`, `fatal` or `unexpected`.
    pub kind: String,
    /// Failure message.
    pub message: String,
    /// When the failure was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Summary of a terminal [`ExecutionContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Execution id.
    pub execution_id: Uuid,
    /// State the context ended in.
    pub final_state: JobState,
    /// Whether the execution was aborted (fatal critical failure or kill).
    pub aborted: bool,
    /// Whether a kill was requested.
    pub killed: bool,
    /// Source of the kill, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_source: Option<KillSource>,
    /// Abort reason, if a critical state failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Every failed attempt, in order.
    pub failures: Vec<FailureEntry>,
    /// Job id reserved with the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Status last acknowledged by the server.
    pub current_job_status: JobStatus,
    /// Status the execution resolved to.
    pub next_job_status: JobStatus,
    /// Message attached to the resolved status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_job_status_message: Option<String>,
    /// Time spent per state, in milliseconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_durations_ms: BTreeMap<JobState, u64>,
}

impl ExecutionReport {
    /// Summarizes a context.
    #[must_use]
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            execution_id: ctx.execution_id(),
            final_state: ctx.current_state(),
            aborted: ctx.is_execution_aborted(),
            killed: ctx.is_killed(),
            kill_source: ctx.kill_source(),
            abort_reason: ctx.execution_aborted_error().map(|error| AbortReason {
                state: error.state,
                message: error.message.clone(),
            }),
            failures: ctx
                .transition_errors()
                .iter()
                .map(|record| FailureEntry {
                    state: record.state,
                    attempt: record.attempt,
                    kind: record.failure.kind().to_string(),
                    message: record.failure.to_string(),
                    recorded_at: record.recorded_at,
                })
                .collect(),
            job_id: ctx.reserved_job_id.clone(),
            current_job_status: ctx.current_job_status,
            next_job_status: ctx.next_job_status,
            next_job_status_message: ctx.next_job_status_message.clone(),
            state_durations_ms: BTreeMap::new(),
        }
    }

    /// Adds the per-state durations measured by a timing listener.
    #[must_use]
    pub fn with_timings(mut self, timing: &StateTimingListener) -> Self {
        self.state_durations_ms = timing
            .durations()
            .into_iter()
            .map(|(state, duration)| {
                (state, u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            })
            .collect();
        self
    }

    /// Renders the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
