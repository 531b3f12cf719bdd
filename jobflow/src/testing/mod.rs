//! Testing utilities for jobflow pipelines.
//!
//! This module provides:
//! - Scripted, slow and recording stages
//! - A pipeline fixture wired with an event collector
//! - Assertions over execution results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_aborted_in, assert_all_states_visited, assert_clean_run, assert_states_attempted,
};
pub use fixtures::TestPipeline;
pub use mocks::{Outcome, RecordedAttempt, RecordingStage, ScriptedStage, SlowStage};
