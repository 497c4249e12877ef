//! Timer capability injected into a [`Connection`](crate::Connection).
//!
//! The connection never touches a runtime's timer API directly. Heartbeat
//! pings and liveness checks are registered through [`Scheduler`], which
//! lets tests drive time by hand and lets embedders plug in their own event
//! loop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

/// Identifier of a repeating timer returned by [`Scheduler::schedule_repeating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Work run on every tick of a repeating timer.
pub type Task = Box<dyn FnMut() + Send + 'static>;

/// Repeating-timer facility.
///
/// Implementations must not run `task` inline from `schedule_repeating` or
/// `cancel`; the connection may call both while holding its session lock.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` every `interval`, first after one full interval.
    fn schedule_repeating(&self, interval: Duration, task: Task) -> TimerId;

    /// Stop a timer. Unknown or already-cancelled ids are ignored.
    fn cancel(&self, id: TimerId);

    /// Current instant, used for server-activity bookkeeping.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// [`Scheduler`] backed by tokio tasks and `tokio::time::interval`.
///
/// Each timer is a spawned task; cancelling aborts it. `now()` reads the
/// tokio clock, so paused-time tests see a consistent timeline.
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerId, AbortHandle>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Build a scheduler on the runtime the caller is running in.
    pub fn current() -> io::Result<Self> {
        let handle = Handle::try_current().map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Self::new(handle))
    }

    /// Number of timers that have not been cancelled.
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, interval: Duration, mut task: Task) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let interval = interval.max(Duration::from_millis(1));
        let join = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task();
            }
        });
        self.timers.lock().insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.timers.lock().remove(&id) {
            handle.abort();
        }
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.lock().drain() {
            handle.abort();
        }
    }
}
