//! One-shot timers running on a dedicated background thread.
//!
//! Pending timers are kept in a single ordered map guarded by a mutex. The worker thread removes
//! a timer from that map before running its callback, and [`TimerHandle::stop`] removes it from
//! the same map, so a timer is either stopped or fired, never both.
use std::collections::BTreeMap;
use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::MutexGuard;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Ordering key of a pending timer. The sequence number breaks ties between equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: Instant,
    seq: u64,
}

#[derive(Default)]
struct Queue {
    pending: BTreeMap<TimerKey, Callback>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

/// Scheduler for one-shot timers.
///
/// The worker thread is started on the first call to [`TimerService::after`] and stopped when the
/// service is dropped. Timers that are still pending at that point never fire.
pub struct TimerService {
    shared: Arc<Shared>,
    worker: OnceLock<Option<JoinHandle<()>>>,
}

/// Handle to a timer scheduled on a [`TimerService`].
///
/// Dropping the handle does not cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
    key: TimerKey,
    shared: Weak<Shared>,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
            worker: OnceLock::new(),
        }
    }

    /// Run `callback` on the timer thread once `delay` has passed, unless stopped first.
    pub fn after<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        // Absurdly long delays are clamped rather than overflowing the clock
        let deadline = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX.into()));

        let (key, earliest) = {
            let mut queue = self.shared.queue.lock();
            let key = TimerKey {
                deadline,
                seq: queue.next_seq,
            };
            queue.next_seq += 1;

            let earliest = queue.pending.keys().next().map_or(true, |first| key < *first);
            queue.pending.insert(key, Box::new(callback));

            (key, earliest)
        };

        self.ensure_worker();
        if earliest {
            self.shared.wakeup.notify_one();
        }

        TimerHandle {
            key,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of timers that have neither fired nor been stopped.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    fn ensure_worker(&self) {
        self.worker.get_or_init(|| {
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("lockwatch-timer".into())
                .spawn(move || run(&shared))
            {
                Ok(handle) => Some(handle),
                Err(error) => {
                    tracing::error!(target: "lockwatch", %error, "failed to start timer thread");
                    None
                }
            }
        });
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.wakeup.notify_all();

        if let Some(Some(handle)) = self.worker.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl TimerHandle {
    /// Prevent the timer from firing.
    ///
    /// Returns `true` if the timer was still pending. Returns `false` if it already fired, is
    /// firing right now, or was stopped before.
    pub fn stop(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        let callback = shared.queue.lock().pending.remove(&self.key);
        // Dropped outside the queue lock, as it may own arbitrary state.
        callback.is_some()
    }

    /// Whether the timer has neither fired nor been stopped.
    pub fn is_pending(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.queue.lock().pending.contains_key(&self.key))
    }

    /// Whether both handles refer to the same timer.
    pub fn same_timer(&self, other: &TimerHandle) -> bool {
        self.key == other.key && Weak::ptr_eq(&self.shared, &other.shared)
    }

    /// The instant at which the timer fires.
    pub fn deadline(&self) -> Instant {
        self.key.deadline
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("deadline", &self.key.deadline)
            .field("seq", &self.key.seq)
            .finish()
    }
}

fn run(shared: &Shared) {
    let mut queue = shared.queue.lock();

    loop {
        if queue.shutdown {
            return;
        }

        let Some(next) = queue.pending.keys().next().copied() else {
            shared.wakeup.wait(&mut queue);
            continue;
        };

        if next.deadline > Instant::now() {
            shared.wakeup.wait_until(&mut queue, next.deadline);
            continue;
        }

        if let Some(callback) = queue.pending.remove(&next) {
            MutexGuard::unlocked(&mut queue, || fire(callback));
        }
    }
}

/// Run a callback, keeping the worker alive if it panics.
fn fire(callback: Callback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let reason = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");

        tracing::error!(target: "lockwatch", reason, "timer callback panicked");
    }
}
