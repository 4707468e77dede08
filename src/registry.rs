use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::timer::TimerHandle;
use crate::LockId;

/// Held-lock watchdogs, keyed by lock identity.
///
/// A lock that has been acquired with diagnostics enabled has an entry here until it is released
/// or its watchdog expires. Every operation holds the internal mutex only for the map access
/// itself.
///
/// The registry also keeps the stack of the most recent acquisition of every watched lock, so a
/// watchdog reports whoever holds the lock when it fires rather than when it was armed.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<LockId, TimerHandle>>,
    last_calls: Mutex<HashMap<LockId, Arc<str>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the watchdog registered for `id`.
    pub fn get(&self, id: LockId) -> Option<TimerHandle> {
        self.timers.lock().get(&id).cloned()
    }

    /// Register `timer` for `id`, replacing any previous entry without stopping it.
    pub fn save(&self, id: LockId, timer: TimerHandle) {
        self.timers.lock().insert(id, timer);
    }

    /// Remove the watchdog for `id`.
    ///
    /// Unless `expired` is set, the timer is stopped first so its callback never runs.
    pub fn remove(&self, id: LockId, expired: bool) {
        let mut timers = self.timers.lock();
        if let Some(timer) = timers.remove(&id) {
            if !expired {
                timer.stop();
            }
        }
    }

    /// Number of registered watchdogs.
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stack of the most recent acquisition of `id` made with diagnostics enabled.
    pub fn last_acquisition(&self, id: LockId) -> Option<Arc<str>> {
        self.last_calls.lock().get(&id).cloned()
    }

    pub(crate) fn record_acquisition(&self, id: LockId, stack: Arc<str>) {
        self.last_calls.lock().insert(id, stack);
    }

    /// Drop everything known about `id`, as the lock itself is gone.
    pub(crate) fn forget(&self, id: LockId) {
        self.remove(id, false);
        self.last_calls.lock().remove(&id);
    }

    /// Register the timer produced by `arm` unless a watchdog for `id` is already present.
    ///
    /// The check and the insertion happen under one lock, so concurrent shared acquisitions of
    /// the same lock arm at most one watchdog between them. Returns whether a timer was armed.
    pub(crate) fn arm_if_absent(&self, id: LockId, arm: impl FnOnce() -> TimerHandle) -> bool {
        let mut timers = self.timers.lock();
        if timers.contains_key(&id) {
            return false;
        }

        timers.insert(id, arm());
        true
    }

    /// Deregister the watchdog for `id` from within its own callback.
    ///
    /// If the lock was released and acquired again while the callback ran, the entry now belongs
    /// to a newer, still pending timer, and is left alone.
    pub(crate) fn expire(&self, id: LockId) {
        let mut timers = self.timers.lock();
        if timers.get(&id).is_some_and(|timer| !timer.is_pending()) {
            timers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::timer::TimerService;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn test_save_get_remove() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        assert!(registry.get(id).is_none());

        let timer = timers.after(LONG, || {});
        registry.save(id, timer.clone());

        assert!(registry.get(id).is_some_and(|found| found.same_timer(&timer)));
        assert_eq!(registry.len(), 1);

        registry.remove(id, false);
        assert!(registry.is_empty());
        assert!(!timer.is_pending(), "removal should stop the timer");
    }

    #[test]
    fn test_remove_expired_does_not_stop() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        let timer = timers.after(LONG, || {});
        registry.save(id, timer.clone());
        registry.remove(id, true);

        assert!(registry.is_empty());
        assert!(timer.is_pending());
        timer.stop();
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let registry = TimerRegistry::new();
        registry.remove(LockId::new(), false);
        registry.remove(LockId::new(), true);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_overwrites() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        let first = timers.after(LONG, || {});
        let second = timers.after(LONG, || {});
        registry.save(id, first.clone());
        registry.save(id, second.clone());

        assert!(registry.get(id).is_some_and(|found| found.same_timer(&second)));
        assert_eq!(registry.len(), 1);
        // Overwriting leaves the previous timer alone
        assert!(first.is_pending());

        first.stop();
        registry.remove(id, false);
        assert!(!second.is_pending());
    }

    #[test]
    fn test_arm_if_absent() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        assert!(registry.arm_if_absent(id, || timers.after(LONG, || {})));
        assert!(!registry.arm_if_absent(id, || unreachable!("already armed")));
        assert_eq!(registry.len(), 1);

        registry.remove(id, false);
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn test_expire_keeps_newer_timer() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        let pending = timers.after(LONG, || {});
        registry.save(id, pending.clone());
        registry.expire(id);
        assert!(registry.get(id).is_some(), "pending timer must survive");

        pending.stop();
        registry.expire(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_acquisition() {
        let timers = TimerService::new();
        let registry = TimerRegistry::new();
        let id = LockId::new();

        assert!(registry.last_acquisition(id).is_none());

        registry.record_acquisition(id, "first".into());
        registry.record_acquisition(id, "second".into());
        assert_eq!(registry.last_acquisition(id).as_deref(), Some("second"));

        registry.save(id, timers.after(LONG, || {}));
        registry.forget(id);
        assert!(registry.last_acquisition(id).is_none());
        assert!(registry.is_empty());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        let timers = Arc::new(TimerService::new());
        let registry = Arc::new(TimerRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let timers = Arc::clone(&timers);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let id = LockId::new();
                        registry.arm_if_absent(id, || timers.after(LONG, || {}));
                        assert!(registry.get(id).is_some());
                        registry.remove(id, false);
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .for_each(|handle| handle.join().unwrap());

        assert!(registry.is_empty());
        assert_eq!(timers.pending(), 0);
    }
}
