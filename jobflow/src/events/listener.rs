//! Listener trait and implementations.

use super::ExecutionEvent;
use crate::core::JobState;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

/// Observer of a job execution.
///
/// Called synchronously on the state machine's task; implementations should
/// return quickly.
pub trait ExecutionListener: Send + Sync {
    /// Receives one event.
    fn on_event(&self, event: &ExecutionEvent);
}

/// Broadcasts events to a list of listeners.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl ListenerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add(&mut self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.push(listener);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers an event to every listener.
    ///
    /// A panicking listener does not prevent delivery to the others.
    pub fn broadcast(&self, event: &ExecutionEvent) {
        for (index, listener) in self.listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                warn!(
                    listener = index,
                    event = event.name(),
                    "Execution listener panicked, event dropped for this listener"
                );
            }
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A listener backed by a closure.
pub struct FnListener<F>
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    func: F,
}

impl<F> FnListener<F>
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    /// Wraps a closure.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> ExecutionListener for FnListener<F>
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExecutionEvent) {
        (self.func)(event);
    }
}

/// A listener that logs events using the tracing framework.
///
/// Progress events are logged at the configured level; failures always at
/// WARN or ERROR.
#[derive(Debug, Clone)]
pub struct LoggingListener {
    level: Level,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingListener {
    /// Creates a logging listener with the specified level for progress events.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging listener.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn progress(&self, event: &ExecutionEvent) {
        let state = event.state().map(JobState::as_str).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event = event.name(), state, "Execution event");
        } else {
            info!(event = event.name(), state, "Execution event");
        }
    }
}

impl ExecutionListener for LoggingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::AfterAttempt {
                state,
                attempt,
                failure: Some(failure),
            } => {
                warn!(
                    state = %state,
                    attempt,
                    kind = failure.kind(),
                    error = %failure,
                    "Stage attempt failed"
                );
            }
            ExecutionEvent::DelayedRetry { state, delay } => {
                info!(
                    state = %state,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying after delay"
                );
            }
            ExecutionEvent::ExecutionAborted { state, error } => {
                error!(state = %state, error = %error, "Execution aborted");
            }
            ExecutionEvent::FatalException { state, error } => {
                error!(state = %state, error = %error, "Fatal error, giving up on state");
            }
            _ => self.progress(event),
        }
    }
}

/// A listener that keeps every event, for tests and reports.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: RwLock<Vec<ExecutionEvent>>,
}

impl CollectingListener {
    /// Creates a new collecting listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.read().clone()
    }

    /// Returns the names of all collected events, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(ExecutionEvent::name).collect()
    }

    /// Counts events with the given name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name() == name).count()
    }

    /// States for which the given event fired, in order.
    #[must_use]
    pub fn states_for(&self, name: &str) -> Vec<JobState> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name() == name)
            .filter_map(ExecutionEvent::state)
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl ExecutionListener for CollectingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingListener;

    impl ExecutionListener for PanickingListener {
        fn on_event(&self, _event: &ExecutionEvent) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_broadcast_survives_panicking_listener() {
        let collector = Arc::new(CollectingListener::new());
        let mut set = ListenerSet::new();
        set.add(Arc::new(PanickingListener));
        set.add(collector.clone());

        set.broadcast(&ExecutionEvent::StateMachineStarted);
        set.broadcast(&ExecutionEvent::StateEntered(JobState::Initialize));

        assert_eq!(collector.names(), vec!["state-machine-started", "state-entered"]);
    }

    #[test]
    fn test_fn_listener() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut set = ListenerSet::new();
        set.add(Arc::new(FnListener::new(move |_event: &ExecutionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        set.broadcast(&ExecutionEvent::StateMachineStopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_logging_listener_handles_every_kind() {
        let listener = LoggingListener::debug();
        listener.on_event(&ExecutionEvent::StateSkipped(JobState::Setup));
        listener.on_event(&ExecutionEvent::AfterAttempt {
            state: JobState::Setup,
            attempt: 1,
            failure: Some(StageFailure::retryable("flaky")),
        });
        listener.on_event(&ExecutionEvent::DelayedRetry {
            state: JobState::Setup,
            delay: std::time::Duration::from_millis(250),
        });
    }

    #[test]
    fn test_collecting_listener_queries() {
        let collector = CollectingListener::new();
        collector.on_event(&ExecutionEvent::StateEntered(JobState::Cleanup));
        collector.on_event(&ExecutionEvent::StateSkipped(JobState::Launch));
        collector.on_event(&ExecutionEvent::StateEntered(JobState::Shutdown));

        assert_eq!(collector.count("state-entered"), 2);
        assert_eq!(
            collector.states_for("state-entered"),
            vec![JobState::Cleanup, JobState::Shutdown]
        );

        collector.clear();
        assert!(collector.is_empty());
    }
}
