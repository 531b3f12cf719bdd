//! Test assertions for execution results.

use crate::context::ExecutionContext;
use crate::core::JobState;
use crate::events::CollectingListener;

/// Asserts that the stages of exactly these states were attempted, in order.
///
/// Retries of a state count once.
pub fn assert_states_attempted(collector: &CollectingListener, expected: &[JobState]) {
    let mut attempted = collector.states_for("before-attempt");
    attempted.dedup();
    assert_eq!(
        attempted, expected,
        "Expected attempted states {expected:?}, got {attempted:?}"
    );
}

/// Asserts that every pipeline state was entered and exited, in order.
pub fn assert_all_states_visited(collector: &CollectingListener) {
    assert_eq!(
        collector.states_for("state-entered"),
        JobState::PIPELINE.to_vec(),
        "Not every pipeline state was entered"
    );
    assert_eq!(
        collector.states_for("state-exited"),
        JobState::PIPELINE.to_vec(),
        "Not every pipeline state was exited"
    );
}

/// Asserts that the execution ended without abort, kill or recorded failure.
pub fn assert_clean_run(ctx: &ExecutionContext) {
    assert!(
        !ctx.is_execution_aborted(),
        "Execution was aborted: {:?}",
        ctx.execution_aborted_error()
    );
    assert!(
        ctx.transition_errors().is_empty(),
        "Expected no failures, got {}",
        ctx.transition_errors().len()
    );
}

/// Asserts that a critical state aborted the execution.
pub fn assert_aborted_in(ctx: &ExecutionContext, state: JobState) {
    let error = ctx
        .execution_aborted_error()
        .unwrap_or_else(|| panic!("Expected execution aborted in {state}, but it was not"));
    assert_eq!(
        error.state, state,
        "Expected abort in {state}, got abort in {}",
        error.state
    );
}
