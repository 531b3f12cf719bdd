//! The mutable context shared by every stage of a job execution.

use super::{CleanupStrategy, JobSpecification, ProcessHandle, ProcessResult, TransitionErrorRecord};
use crate::cancellation::{KillHandle, KillSource, KillSwitch};
use crate::core::{JobState, JobStatus};
use crate::stages::{FatalExecutionError, StageFailure};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// State and results of a single job execution.
///
/// The state machine owns the context for the whole run and hands it to one
/// stage at a time, so most fields are plain data. Only the kill flags (in the
/// shared [`KillSwitch`]) and the `started` flag are touched from other threads.
///
/// Artifact fields are `None` until the stage producing them has succeeded.
pub struct ExecutionContext {
    execution_id: Uuid,
    started: AtomicBool,
    current_state: JobState,
    attempts_left: u32,
    execution_aborted: Option<FatalExecutionError>,
    kill_switch: Arc<KillSwitch>,
    transition_errors: Vec<TransitionErrorRecord>,
    data: HashMap<String, serde_json::Value>,

    /// Job status as last acknowledged by the server.
    pub current_job_status: JobStatus,
    /// Status the final status update should publish.
    pub next_job_status: JobStatus,
    /// Message attached to the next status update.
    pub next_job_status_message: Option<String>,
    /// Job id requested on the command line, if any.
    pub requested_job_id: Option<String>,
    /// Job id reserved with the server.
    pub reserved_job_id: Option<String>,
    /// Specification resolved by the server.
    pub job_specification: Option<JobSpecification>,
    /// Local job directory.
    pub job_directory: Option<PathBuf>,
    /// True once the job process was launched.
    pub job_launched: bool,
    /// Handle to the launched job process.
    pub process: Option<ProcessHandle>,
    /// Outcome of the job process.
    pub process_result: Option<ProcessResult>,
    /// What to remove from the job directory after execution.
    pub cleanup_strategy: CleanupStrategy,
}

impl ExecutionContext {
    /// Creates a fresh, not-yet-started context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            started: AtomicBool::new(false),
            current_state: JobState::Ready,
            attempts_left: 0,
            execution_aborted: None,
            kill_switch: Arc::new(KillSwitch::new()),
            transition_errors: Vec::new(),
            data: HashMap::new(),
            current_job_status: JobStatus::Invalid,
            next_job_status: JobStatus::Invalid,
            next_job_status_message: None,
            requested_job_id: None,
            reserved_job_id: None,
            job_specification: None,
            job_directory: None,
            job_launched: false,
            process: None,
            process_result: None,
            cleanup_strategy: CleanupStrategy::default(),
        }
    }

    /// Sets the execution id.
    #[must_use]
    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = execution_id;
        self
    }

    /// Sets the job id requested by the user.
    #[must_use]
    pub fn with_requested_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.requested_job_id = Some(job_id.into());
        self
    }

    /// Sets the cleanup strategy.
    #[must_use]
    pub fn with_cleanup_strategy(mut self, strategy: CleanupStrategy) -> Self {
        self.cleanup_strategy = strategy;
        self
    }

    /// Returns the execution id.
    #[must_use]
    pub const fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Marks the context as started.
    ///
    /// Returns false if it was already started.
    pub fn mark_started(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns whether the context was started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns the state the execution is currently in.
    #[must_use]
    pub const fn current_state(&self) -> JobState {
        self.current_state
    }

    pub(crate) fn set_current_state(&mut self, state: JobState) {
        self.current_state = state;
    }

    /// Attempts left for the current state, not counting the one in progress.
    #[must_use]
    pub const fn attempts_left(&self) -> u32 {
        self.attempts_left
    }

    pub(crate) fn set_attempts_left(&mut self, attempts: u32) {
        self.attempts_left = attempts;
    }

    pub(crate) fn consume_attempt(&mut self) -> u32 {
        self.attempts_left = self.attempts_left.saturating_sub(1);
        self.attempts_left
    }

    /// Returns true if a critical state failed fatally or a kill was requested.
    ///
    /// Once true, stays true.
    #[must_use]
    pub fn is_execution_aborted(&self) -> bool {
        self.execution_aborted.is_some() || self.is_killed()
    }

    /// The fatal error that aborted the execution, if any.
    #[must_use]
    pub const fn execution_aborted_error(&self) -> Option<&FatalExecutionError> {
        self.execution_aborted.as_ref()
    }

    /// Records the abort reason. The first reason wins.
    pub(crate) fn set_execution_aborted(&mut self, error: FatalExecutionError) -> bool {
        if self.execution_aborted.is_some() {
            return false;
        }
        self.execution_aborted = Some(error);
        true
    }

    /// Returns whether a kill was requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.kill_switch.is_killed()
    }

    /// The source of the first kill request, if any.
    #[must_use]
    pub fn kill_source(&self) -> Option<KillSource> {
        self.kill_switch.source()
    }

    /// Whether the final status update must be skipped.
    #[must_use]
    pub fn skip_final_status_update(&self) -> bool {
        self.kill_switch.skip_final_status_update()
    }

    /// The kill switch shared with the state machine.
    #[must_use]
    pub const fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    /// A handle for delivering kills from elsewhere.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle::new(self.kill_switch.clone())
    }

    pub(crate) fn record_transition_error(
        &mut self,
        state: JobState,
        attempt: u32,
        failure: StageFailure,
    ) {
        self.transition_errors
            .push(TransitionErrorRecord::new(state, attempt, failure));
    }

    /// Every failed attempt so far, in order.
    #[must_use]
    pub fn transition_errors(&self) -> &[TransitionErrorRecord] {
        &self.transition_errors
    }

    /// Stores an arbitrary stage-produced value.
    pub fn set_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Gets a stage-produced value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("current_state", &self.current_state)
            .field("attempts_left", &self.attempts_left)
            .field("aborted", &self.is_execution_aborted())
            .field("killed", &self.is_killed())
            .field("transition_errors", &self.transition_errors.len())
            .field("current_job_status", &self.current_job_status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_defaults() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.current_state(), JobState::Ready);
        assert!(!ctx.is_started());
        assert!(!ctx.is_execution_aborted());
        assert!(ctx.transition_errors().is_empty());
        assert_eq!(ctx.current_job_status, JobStatus::Invalid);
    }

    #[test]
    fn test_mark_started_only_once() {
        let ctx = ExecutionContext::new();
        assert!(ctx.mark_started());
        assert!(!ctx.mark_started());
        assert!(ctx.is_started());
    }

    #[test]
    fn test_abort_first_reason_wins() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.set_execution_aborted(FatalExecutionError::new(
            JobState::Setup,
            "first",
            None
        )));
        assert!(!ctx.set_execution_aborted(FatalExecutionError::new(
            JobState::Launch,
            "second",
            None
        )));

        let reason = ctx.execution_aborted_error().unwrap();
        assert_eq!(reason.state, JobState::Setup);
        assert_eq!(reason.message, "first");
        assert!(ctx.is_execution_aborted());
    }

    #[test]
    fn test_kill_aborts_execution() {
        let ctx = ExecutionContext::new();
        ctx.kill_handle().kill(KillSource::UserRequest);

        assert!(ctx.is_killed());
        assert!(ctx.is_execution_aborted());
        assert!(ctx.execution_aborted_error().is_none());
        assert_eq!(ctx.kill_source(), Some(KillSource::UserRequest));
    }

    #[test]
    fn test_attempt_counter_saturates() {
        let mut ctx = ExecutionContext::new();
        ctx.set_attempts_left(2);
        assert_eq!(ctx.consume_attempt(), 1);
        assert_eq!(ctx.consume_attempt(), 0);
        assert_eq!(ctx.consume_attempt(), 0);
    }

    #[test]
    fn test_transition_errors_append_only() {
        let mut ctx = ExecutionContext::new();
        ctx.record_transition_error(JobState::Configure, 1, StageFailure::retryable("a"));
        ctx.record_transition_error(JobState::Configure, 2, StageFailure::fatal("b"));

        let records = ctx.transition_errors();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[1].failure.to_string(), "b");
    }

    #[test]
    fn test_value_bag() {
        let mut ctx = ExecutionContext::new();
        ctx.set_value("archive_location", serde_json::json!("s3://bucket/job"));
        assert_eq!(
            ctx.value("archive_location"),
            Some(&serde_json::json!("s3://bucket/job"))
        );
        assert!(ctx.value("missing").is_none());
    }
}
