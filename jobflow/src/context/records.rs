//! Audit records of failed stage attempts.

use crate::core::JobState;
use crate::stages::StageFailure;
use chrono::{DateTime, Utc};

/// A failed attempt and the state in which it happened.
#[derive(Debug, Clone)]
pub struct TransitionErrorRecord {
    /// State whose stage failed.
    pub state: JobState,
    /// 1-based attempt number within the state.
    pub attempt: u32,
    /// The failure as returned (or raised) by the stage.
    pub failure: StageFailure,
    /// When the failure was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl TransitionErrorRecord {
    /// Creates a record timestamped now.
    #[must_use]
    pub fn new(state: JobState, attempt: u32, failure: StageFailure) -> Self {
        Self {
            state,
            attempt,
            failure,
            recorded_at: Utc::now(),
        }
    }
}
