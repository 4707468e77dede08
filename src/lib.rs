//! Mutexes that tell you when they are stuck.
//!
//! This crate provides drop-in wrappers around the [`parking_lot`] locks that keep an eye on how
//! long acquiring and holding them takes. Whenever an acquisition blocks, or a lock stays held,
//! for longer than a configured threshold, a report is written to a [`LogSink`] containing the
//! stack of the blocked call and the stack of whoever acquired the lock last. That is usually
//! enough to see the two halves of a deadlock.
//!
//! Next to the locks, [`WaitSession`] offers a small rendezvous registry: one thread registers a
//! key, another thread delivers a value for it, and the first one blocks until that value shows
//! up or a timeout expires.
//!
//! # Debug switch
//!
//! Instrumentation is off by default. When it is off, the locks are plain pass-through wrappers
//! and the only overhead is a branch on an atomic flag. It can be switched on through
//! [`set_debug`], through the `LOCKWATCH_DEBUG` and `LOCKWATCH_TIMEOUT_MS` environment variables
//! (see [`DebugConfig::from_env`]), or per lock by binding it to its own [`Diagnostics`].
//!
//! ```rust
//! use std::time::Duration;
//!
//! use lockwatch::parkinglot::Mutex;
//!
//! lockwatch::set_debug(true, Some(Duration::from_secs(3)));
//!
//! let mutex = Mutex::new(0);
//! *mutex.lock() += 1;
//! assert_eq!(*mutex.lock(), 1);
//! ```
//!
//! # Reports
//!
//! A report for an acquisition that took too long looks roughly like this:
//!
//! ```text
//! ----------------------------------------
//! Mutex lock() Timeout (3.001s), possible deadlock
//!   since: 1760000000.123
//!   this call:
//!     stack: 1 [file: src/main.rs] [func: app::worker] [line: 42]
//!   last call:
//!     stack: 1 [file: src/main.rs] [func: app::main] [line: 17]
//! ----------------------------------------
//! ```
//!
//! Reports are diagnostics only. No lock operation ever fails because of them, and timers may
//! fire spuriously on a heavily loaded machine.
//!
//! # Features
//!
//! - `backtraces` (default): resolve the call stacks shown in reports. Without it, reports still
//!   fire but carry empty stacks.
#![cfg_attr(docsrs, feature(doc_cfg))]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;

pub use crate::diagnostics::set_debug;
pub use crate::diagnostics::DebugConfig;
pub use crate::diagnostics::Diagnostics;
pub use crate::error::SessionError;
pub use crate::registry::TimerRegistry;
pub use crate::reporting::LogSink;
pub use crate::reporting::TracingSink;
pub use crate::session::WaitSession;
pub use crate::timer::TimerHandle;
pub use crate::timer::TimerService;

mod diagnostics;
mod error;
pub mod lockapi;
pub mod parkinglot;
mod registry;
mod reporting;
mod session;
pub mod stack;
mod timer;

/// Counter for lock IDs. Atomic avoids the need for locking.
static ID_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a lock instance.
///
/// Identities are handed out from a counter, never reused, and do not depend on where the lock
/// lives in memory. They key the held-lock timers in a [`TimerRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(usize);

impl LockId {
    /// Get a new, unique, lock ID.
    ///
    /// # Panics
    ///
    /// This function may panic when there are no more lock IDs available. The number of lock ids
    /// is `usize::MAX - 1` which should be plenty for most practical applications.
    pub fn new() -> Self {
        ID_SEQUENCE
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map(Self)
            .expect("Lock ID wraparound happened, results unreliable")
    }

    /// The numeric value of this identity.
    pub fn value(&self) -> usize {
        self.0
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

/// A lock identity that is only assigned when it is first needed.
///
/// Locks that never run with diagnostics enabled never consume an ID, and the wrapper can still
/// be constructed in a `const` context.
#[derive(Debug, Default)]
pub(crate) struct LazyLockId {
    inner: OnceLock<LockId>,
}

impl LazyLockId {
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Get the identity, assigning one on first use.
    pub fn get(&self) -> LockId {
        *self.inner.get_or_init(LockId::new)
    }

    /// Get the identity if it has been assigned already.
    pub fn get_assigned(&self) -> Option<LockId> {
        self.inner.get().copied()
    }
}
