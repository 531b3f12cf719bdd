//! Kill switch for cooperative job cancellation.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Where a kill request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSource {
    /// A user asked the server to kill the job.
    UserRequest,
    /// The agent process received a termination signal.
    SystemSignal,
    /// The server already marked the job as finished (e.g. failed by the leader).
    RemoteStatusMonitor,
    /// The job exceeded its allotted run time.
    Timeout,
    /// The job directory exceeded its file limits.
    FilesLimit,
}

impl fmt::Display for KillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserRequest => "user request",
            Self::SystemSignal => "system signal",
            Self::RemoteStatusMonitor => "remote status monitor",
            Self::Timeout => "timeout",
            Self::FilesLimit => "files limit",
        };
        f.write_str(name)
    }
}

/// A callback invoked once when the first kill request arrives.
pub type KillCallback = Box<dyn Fn(KillSource) + Send + Sync>;

/// The flags shared between the state machine and whoever delivers kills.
///
/// Both flags only ever go from `false` to `true`. The first kill source is
/// kept; later requests are no-ops apart from the remote-status flag.
#[derive(Default)]
pub struct KillSwitch {
    killed: AtomicBool,
    skip_final_status_update: AtomicBool,
    source: RwLock<Option<KillSource>>,
    callbacks: Mutex<Vec<KillCallback>>,
    notify: Notify,
}

impl KillSwitch {
    /// Creates a new, un-triggered kill switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the job to be killed.
    ///
    /// Returns true if this call was the first kill request. Callbacks run on
    /// the calling thread; panics in callbacks are logged and suppressed.
    pub fn kill(&self, source: KillSource) -> bool {
        if source == KillSource::RemoteStatusMonitor {
            self.skip_final_status_update.store(true, Ordering::SeqCst);
        }

        if self
            .killed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%source, "Kill already requested, ignoring");
            return false;
        }

        *self.source.write() = Some(source);
        info!(%source, "Job kill requested");
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in &callbacks {
            Self::invoke(callback.as_ref(), source);
        }
        true
    }

    /// Registers a callback to run on the first kill.
    ///
    /// If a kill was already requested, the callback runs immediately.
    pub fn on_kill<F>(&self, callback: F)
    where
        F: Fn(KillSource) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock();
        match self.source() {
            Some(source) if self.is_killed() => {
                drop(callbacks);
                Self::invoke(&callback, source);
            }
            _ => callbacks.push(Box::new(callback)),
        }
    }

    /// Returns whether a kill has been requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Returns whether the final status update must be skipped.
    #[must_use]
    pub fn skip_final_status_update(&self) -> bool {
        self.skip_final_status_update.load(Ordering::SeqCst)
    }

    /// Returns the source of the first kill request, if any.
    #[must_use]
    pub fn source(&self) -> Option<KillSource> {
        *self.source.read()
    }

    /// Completes once a kill has been requested.
    pub async fn killed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_killed() {
                return;
            }
            notified.await;
        }
    }

    fn invoke(callback: &(dyn Fn(KillSource) + Send + Sync), source: KillSource) {
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(source);
        })) {
            warn!("Kill callback panicked: {:?}", e);
        }
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillSwitch")
            .field("killed", &self.is_killed())
            .field("source", &self.source())
            .field("skip_final_status_update", &self.skip_final_status_update())
            .finish_non_exhaustive()
    }
}

/// A cloneable handle for delivering kills from other threads or tasks.
#[derive(Debug, Clone)]
pub struct KillHandle {
    switch: Arc<KillSwitch>,
}

impl KillHandle {
    /// Creates a handle for the given switch.
    #[must_use]
    pub fn new(switch: Arc<KillSwitch>) -> Self {
        Self { switch }
    }

    /// Requests the job to be killed. Idempotent.
    pub fn kill(&self, source: KillSource) -> bool {
        self.switch.kill(source)
    }

    /// Returns whether a kill has been requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.switch.is_killed()
    }
}
