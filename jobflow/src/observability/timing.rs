//! Per-state wall-clock timing.

use crate::core::JobState;
use crate::events::{ExecutionEvent, ExecutionListener};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Measures how long each state took, from entry to exit.
#[derive(Debug, Default)]
pub struct StateTimingListener {
    entered: Mutex<HashMap<JobState, Instant>>,
    durations: Mutex<BTreeMap<JobState, Duration>>,
    total: Mutex<Option<(Instant, Option<Duration>)>>,
}

impl StateTimingListener {
    /// Creates a new timing listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration of every exited state.
    #[must_use]
    pub fn durations(&self) -> BTreeMap<JobState, Duration> {
        self.durations.lock().clone()
    }

    /// Duration of one state, if it was exited.
    #[must_use]
    pub fn duration(&self, state: JobState) -> Option<Duration> {
        self.durations.lock().get(&state).copied()
    }

    /// Duration of the whole run, once stopped.
    #[must_use]
    pub fn total(&self) -> Option<Duration> {
        let total = *self.total.lock();
        total.and_then(|(_, total)| total)
    }
}

impl ExecutionListener for StateTimingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::StateMachineStarted => {
                *self.total.lock() = Some((Instant::now(), None));
            }
            ExecutionEvent::StateEntered(state) => {
                self.entered.lock().insert(*state, Instant::now());
            }
            ExecutionEvent::StateExited(state) => {
                if let Some(started) = self.entered.lock().remove(state) {
                    self.durations.lock().insert(*state, started.elapsed());
                }
            }
            ExecutionEvent::StateMachineStopped => {
                let mut total = self.total.lock();
                if let Some((started, _)) = *total {
                    *total = Some((started, Some(started.elapsed())));
                }
            }
            _ => {}
        }
    }
}
