//! Wrapper implementations for [`lock_api`].
//!
//! [`WatchdogRaw`] wraps any raw lock and implements whichever of the [`lock_api`] raw traits the
//! wrapped type implements, so the same wrapper backs both mutexes and rwlocks. The ready-made
//! type aliases live in [`parkinglot`][crate::parkinglot].
//!
//! With diagnostics enabled, every blocking acquisition arms a watchdog that reports if the
//! acquisition has not completed within the configured timeout. Once acquired, a second watchdog
//! is registered in the [`TimerRegistry`][crate::TimerRegistry] that reports if the lock is not
//! released in time. Releasing the lock stops that second watchdog.
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use std::time::SystemTime;

use lock_api::RawMutex;
use lock_api::RawMutexFair;
use lock_api::RawMutexTimed;
use lock_api::RawRwLock;
use lock_api::RawRwLockRecursive;

use crate::reporting::Report;
use crate::reporting::Site;
use crate::stack;
use crate::Diagnostics;
use crate::LazyLockId;
use crate::LockId;

/// Watchdog wrapper for all [`lock_api`] traits.
///
/// This wrapper implements any of the locking traits available, given that the wrapped type
/// implements them. As such, this wrapper can be used both for normal mutexes and rwlocks.
///
/// All locking modes share one identity and one record of the most recent acquisition, so a
/// report about a slow shared acquisition may point at an exclusive holder and vice versa. That
/// record lives in the [`TimerRegistry`][crate::TimerRegistry], keyed by the lock identity.
#[derive(Debug)]
pub struct WatchdogRaw<T> {
    inner: T,
    id: LazyLockId,
    /// Diagnostics this lock is bound to. Unset means [`Diagnostics::global`].
    diagnostics: OnceLock<Diagnostics>,
}

impl<T> WatchdogRaw<T> {
    /// Wrap `inner`, reporting through `diagnostics` rather than the global instance.
    pub fn bound(inner: T, diagnostics: Diagnostics) -> Self {
        Self {
            inner,
            id: LazyLockId::new(),
            diagnostics: OnceLock::from(diagnostics),
        }
    }

    /// The identity of this lock, if it has been acquired with diagnostics enabled before.
    pub fn id(&self) -> Option<LockId> {
        self.id.get_assigned()
    }

    /// Stack of the most recent acquisition made with diagnostics enabled.
    pub fn last_acquisition(&self) -> Option<Arc<str>> {
        let id = self.id.get_assigned()?;
        self.diagnostics().registry().last_acquisition(id)
    }

    fn diagnostics(&self) -> &Diagnostics {
        match self.diagnostics.get() {
            Some(diagnostics) => diagnostics,
            None => Diagnostics::global(),
        }
    }

    /// Run a blocking acquisition under an acquisition watchdog.
    fn acquire(&self, site: Site, acquire: impl FnOnce()) {
        let diagnostics = self.diagnostics();
        if !diagnostics.is_enabled() {
            acquire();
            return;
        }

        let id = self.id.get();
        let this_call: Arc<str> = stack::capture().into();
        let watchdog = {
            let this_call = Arc::clone(&this_call);
            let registry = diagnostics.shared_registry();
            let sink = diagnostics.sink();
            let started = Instant::now();
            let since = SystemTime::now();

            diagnostics
                .timers()
                .after(diagnostics.timeout(), move || {
                    // Whoever acquired last by now is the likely holder
                    let last_call = registry.last_acquisition(id);
                    Report::Acquire {
                        site,
                        elapsed: started.elapsed(),
                        since,
                        this_call: &this_call,
                        last_call: last_call.as_deref().unwrap_or_default(),
                    }
                    .emit(&*sink);
                })
        };

        acquire();

        watchdog.stop();
        self.acquired(diagnostics, site, this_call);
    }

    /// Run a non-blocking or bounded acquisition attempt.
    ///
    /// These never arm an acquisition watchdog, but a successful attempt is recorded like any
    /// other acquisition.
    fn attempt(&self, site: Site, attempt: impl FnOnce() -> bool) -> bool {
        let diagnostics = self.diagnostics();
        if !diagnostics.is_enabled() {
            return attempt();
        }

        if !attempt() {
            return false;
        }

        self.acquired(diagnostics, site, stack::capture().into());
        true
    }

    /// Record a successful acquisition and arm the held-lock watchdog.
    ///
    /// An existing watchdog for this lock is left in place. That happens when the lock is held
    /// in shared mode by more than one reader.
    fn acquired(&self, diagnostics: &Diagnostics, site: Site, this_call: Arc<str>) {
        let id = self.id.get();
        diagnostics
            .registry()
            .record_acquisition(id, Arc::clone(&this_call));

        diagnostics.registry().arm_if_absent(id, || {
            let registry = diagnostics.shared_registry();
            let sink = diagnostics.sink();
            let started = Instant::now();
            let since = SystemTime::now();

            diagnostics
                .timers()
                .after(diagnostics.timeout(), move || {
                    Report::Release {
                        site,
                        elapsed: started.elapsed(),
                        since,
                        last_call: &this_call,
                    }
                    .emit(&*sink);
                    registry.expire(id);
                })
        });
    }

    /// Stop the held-lock watchdog, as the lock is about to be released in time.
    ///
    /// Called before the inner release so that the next holder cannot observe, and keep, the
    /// previous holder's watchdog. Runs regardless of the debug switch, so a watchdog armed
    /// before diagnostics were switched off is still stopped.
    fn releasing(&self) {
        if let Some(id) = self.id.get_assigned() {
            self.diagnostics().registry().remove(id, false);
        }
    }
}

impl<T> Drop for WatchdogRaw<T> {
    fn drop(&mut self) {
        if let Some(id) = self.id.get_assigned() {
            self.diagnostics().registry().forget(id);
        }
    }
}

unsafe impl<T> RawMutex for WatchdogRaw<T>
where
    T: RawMutex,
{
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        inner: T::INIT,
        id: LazyLockId::new(),
        diagnostics: OnceLock::new(),
    };

    // The bookkeeping is not tied to the acquiring thread, so the inner marker can be kept.
    type GuardMarker = T::GuardMarker;

    fn lock(&self) {
        self.acquire(Site::MUTEX, || self.inner.lock());
    }

    fn try_lock(&self) -> bool {
        self.attempt(Site::MUTEX, || self.inner.try_lock())
    }

    unsafe fn unlock(&self) {
        self.releasing();
        self.inner.unlock();
    }

    fn is_locked(&self) -> bool {
        // Can't use the default implementation as the inner type might've overwritten it.
        self.inner.is_locked()
    }
}

unsafe impl<T> RawMutexFair for WatchdogRaw<T>
where
    T: RawMutexFair,
{
    unsafe fn unlock_fair(&self) {
        self.releasing();
        self.inner.unlock_fair();
    }

    unsafe fn bump(&self) {
        // The lock is held again once this returns, so the watchdog keeps running.
        self.inner.bump();
    }
}

unsafe impl<T> RawMutexTimed for WatchdogRaw<T>
where
    T: RawMutexTimed,
{
    type Duration = T::Duration;

    type Instant = T::Instant;

    fn try_lock_for(&self, timeout: Self::Duration) -> bool {
        self.attempt(Site::MUTEX, || self.inner.try_lock_for(timeout))
    }

    fn try_lock_until(&self, timeout: Self::Instant) -> bool {
        self.attempt(Site::MUTEX, || self.inner.try_lock_until(timeout))
    }
}

unsafe impl<T> RawRwLock for WatchdogRaw<T>
where
    T: RawRwLock,
{
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        inner: T::INIT,
        id: LazyLockId::new(),
        diagnostics: OnceLock::new(),
    };

    type GuardMarker = T::GuardMarker;

    fn lock_shared(&self) {
        self.acquire(Site::RWLOCK_SHARED, || self.inner.lock_shared());
    }

    fn try_lock_shared(&self) -> bool {
        self.attempt(Site::RWLOCK_SHARED, || self.inner.try_lock_shared())
    }

    unsafe fn unlock_shared(&self) {
        self.releasing();
        self.inner.unlock_shared();
    }

    fn lock_exclusive(&self) {
        self.acquire(Site::RWLOCK_EXCLUSIVE, || self.inner.lock_exclusive());
    }

    fn try_lock_exclusive(&self) -> bool {
        self.attempt(Site::RWLOCK_EXCLUSIVE, || self.inner.try_lock_exclusive())
    }

    unsafe fn unlock_exclusive(&self) {
        self.releasing();
        self.inner.unlock_exclusive();
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    fn is_locked_exclusive(&self) -> bool {
        self.inner.is_locked_exclusive()
    }
}

unsafe impl<T> RawRwLockRecursive for WatchdogRaw<T>
where
    T: RawRwLockRecursive,
{
    fn lock_shared_recursive(&self) {
        self.acquire(Site::RWLOCK_SHARED, || self.inner.lock_shared_recursive());
    }

    fn try_lock_shared_recursive(&self) -> bool {
        self.attempt(Site::RWLOCK_SHARED, || {
            self.inner.try_lock_shared_recursive()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::DebugConfig;

    type Raw = WatchdogRaw<parking_lot::RawMutex>;

    #[test]
    fn test_disabled_is_pass_through() {
        let diagnostics = Diagnostics::new(DebugConfig::default());
        let raw = Raw::bound(parking_lot::RawMutex::INIT, diagnostics.clone());

        raw.lock();
        assert!(RawMutex::is_locked(&raw));
        assert!(!raw.try_lock());
        unsafe { raw.unlock() };

        assert!(!RawMutex::is_locked(&raw));
        assert_eq!(raw.id(), None);
        assert!(raw.last_acquisition().is_none());
        assert!(diagnostics.registry().is_empty());
    }

    #[test]
    fn test_enabled_registers_held_watchdog() {
        let diagnostics = Diagnostics::new(DebugConfig::enabled(Duration::from_secs(60)));
        let raw = Raw::bound(parking_lot::RawMutex::INIT, diagnostics.clone());

        raw.lock();
        let id = raw.id().expect("identity assigned on acquisition");
        assert!(diagnostics.registry().get(id).is_some());
        assert!(raw.last_acquisition().is_some());

        unsafe { raw.unlock() };
        assert!(diagnostics.registry().is_empty());
        assert_eq!(diagnostics.timers().pending(), 0);

        // Identity is stable across acquisitions
        raw.lock();
        assert_eq!(raw.id(), Some(id));
        unsafe { raw.unlock() };
    }

    #[test]
    fn test_failed_attempt_leaves_no_trace() {
        let diagnostics = Diagnostics::new(DebugConfig::enabled(Duration::from_secs(60)));
        let raw = Raw::bound(parking_lot::RawMutex::INIT, diagnostics.clone());

        raw.lock();
        let before = raw.last_acquisition();

        assert!(!raw.try_lock());
        assert!(!raw.try_lock_for(Duration::from_millis(5)));
        assert_eq!(diagnostics.registry().len(), 1);
        assert!(Arc::ptr_eq(
            &before.unwrap(),
            &raw.last_acquisition().unwrap()
        ));

        unsafe { raw.unlock() };
        assert!(raw.try_lock());
        assert_eq!(diagnostics.registry().len(), 1);
        unsafe { raw.unlock() };
        assert!(diagnostics.registry().is_empty());
    }

    #[test]
    fn test_release_after_switching_off_stops_watchdog() {
        let diagnostics = Diagnostics::new(DebugConfig::enabled(Duration::from_secs(60)));
        let raw = Raw::bound(parking_lot::RawMutex::INIT, diagnostics.clone());

        raw.lock();
        assert_eq!(diagnostics.registry().len(), 1);

        diagnostics.set_debug(false, None);
        unsafe { raw.unlock() };

        assert!(diagnostics.registry().is_empty());
        assert_eq!(diagnostics.timers().pending(), 0);
    }

    #[test]
    fn test_drop_forgets_lock() {
        let diagnostics = Diagnostics::new(DebugConfig::enabled(Duration::from_secs(60)));
        let raw = Raw::bound(parking_lot::RawMutex::INIT, diagnostics.clone());

        raw.lock();
        unsafe { raw.unlock() };
        let id = raw.id().unwrap();
        assert!(diagnostics.registry().last_acquisition(id).is_some());

        drop(raw);
        assert!(diagnostics.registry().last_acquisition(id).is_none());
    }

    #[test]
    fn test_unbound_uses_global() {
        let raw = <Raw as RawMutex>::INIT;
        assert!(std::ptr::eq(raw.diagnostics(), Diagnostics::global()));
    }
}
