//! Watchdog wrappers and type aliases for [`parking_lot`] locks.
//!
//! Every alias in this module is a [`lock_api`] lock over a [`WatchdogRaw`]-wrapped `parking_lot`
//! raw lock, so the API is exactly that of the corresponding `parking_lot` type. The original
//! primitives are reexported as [`raw`].
//!
//! Locks built through `new` or the `const_*` constructors report through
//! [`Diagnostics::global`]. The `*_with` constructors bind a lock to a specific [`Diagnostics`]
//! instead.
//!
//! # Usage
//!
//! ```
//! # use std::sync::Arc;
//! # use std::thread;
//! use lockwatch::parkinglot::Mutex;
//! let mutex = Arc::new(Mutex::new(0));
//!
//! let handles: Vec<_> = (0..10).map(|_| {
//!    let mutex = Arc::clone(&mutex);
//!    thread::spawn(move || *mutex.lock() += 1)
//! }).collect();
//!
//! handles.into_iter().for_each(|handle| handle.join().unwrap());
//!
//! // All threads completed so the value should be 10.
//! assert_eq!(10, *mutex.lock());
//! ```
//!
//! # Limitations
//!
//! The watchdog state makes these locks considerably larger than the `parking_lot` locks they
//! wrap. With diagnostics enabled, every blocking acquisition captures a stack trace and
//! schedules a timer, which is far too slow for production hot paths.
use lock_api::RawMutex as _;
use lock_api::RawRwLock as _;

pub use parking_lot as raw;

use crate::lockapi::WatchdogRaw;
use crate::Diagnostics;

pub type RawFairMutex = WatchdogRaw<parking_lot::RawFairMutex>;
pub type RawMutex = WatchdogRaw<parking_lot::RawMutex>;
pub type RawRwLock = WatchdogRaw<parking_lot::RawRwLock>;

/// Watched fair mutex. See: [`parking_lot::FairMutex`].
pub type FairMutex<T> = lock_api::Mutex<RawFairMutex, T>;
/// Mutex guard for [`FairMutex`].
pub type FairMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawFairMutex, T>;
/// RAII guard for [`FairMutexGuard::map`].
pub type MappedFairMutexGuard<'a, T> = lock_api::MappedMutexGuard<'a, RawFairMutex, T>;

/// Watched mutex. See: [`parking_lot::Mutex`].
pub type Mutex<T> = lock_api::Mutex<RawMutex, T>;
/// Mutex guard for [`Mutex`].
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawMutex, T>;
/// RAII guard for [`MutexGuard::map`].
pub type MappedMutexGuard<'a, T> = lock_api::MappedMutexGuard<'a, RawMutex, T>;

/// Watched RwLock. See: [`parking_lot::RwLock`].
///
/// Readers and writers share one held-lock watchdog. The first acquisition arms it and the first
/// release stops it, so with several concurrent readers only the earliest one is watched.
pub type RwLock<T> = lock_api::RwLock<RawRwLock, T>;
/// Read guard for [`RwLock`].
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwLock, T>;
/// Write guard for [`RwLock`].
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwLock, T>;
/// RAII guard for `RwLockReadGuard::map`.
pub type MappedRwLockReadGuard<'a, T> = lock_api::MappedRwLockReadGuard<'a, RawRwLock, T>;
/// RAII guard for `RwLockWriteGuard::map`.
pub type MappedRwLockWriteGuard<'a, T> = lock_api::MappedRwLockWriteGuard<'a, RawRwLock, T>;

/// Creates a new fair mutex in an unlocked state ready for use.
pub const fn const_fair_mutex<T>(val: T) -> FairMutex<T> {
    FairMutex::const_new(<RawFairMutex as lock_api::RawMutex>::INIT, val)
}

/// Creates a new mutex in an unlocked state ready for use.
pub const fn const_mutex<T>(val: T) -> Mutex<T> {
    Mutex::const_new(<RawMutex as lock_api::RawMutex>::INIT, val)
}

/// Creates a new rwlock in an unlocked state ready for use.
pub const fn const_rwlock<T>(val: T) -> RwLock<T> {
    RwLock::const_new(<RawRwLock as lock_api::RawRwLock>::INIT, val)
}

/// Creates a new fair mutex reporting through `diagnostics`.
pub fn fair_mutex_with<T>(diagnostics: &Diagnostics, val: T) -> FairMutex<T> {
    FairMutex::const_new(
        WatchdogRaw::bound(parking_lot::RawFairMutex::INIT, diagnostics.clone()),
        val,
    )
}

/// Creates a new mutex reporting through `diagnostics`.
pub fn mutex_with<T>(diagnostics: &Diagnostics, val: T) -> Mutex<T> {
    Mutex::const_new(
        WatchdogRaw::bound(parking_lot::RawMutex::INIT, diagnostics.clone()),
        val,
    )
}

/// Creates a new rwlock reporting through `diagnostics`.
pub fn rwlock_with<T>(diagnostics: &Diagnostics, val: T) -> RwLock<T> {
    RwLock::const_new(
        WatchdogRaw::bound(parking_lot::RawRwLock::INIT, diagnostics.clone()),
        val,
    )
}
