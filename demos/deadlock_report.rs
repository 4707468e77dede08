//! Show what a watchdog report looks like
//!
//! Two threads take the same pair of locks in opposite order and deadlock. After the timeout,
//! reports for both blocked acquisitions and both overdue releases are printed, and the process
//! exits without ever resolving the deadlock.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lockwatch::parkinglot::Mutex;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("lockwatch=warn")
        .init();

    lockwatch::set_debug(true, Some(Duration::from_millis(500)));

    let a = Arc::new(Mutex::new(()));
    let b = Arc::new(Mutex::new(()));

    {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || {
            let _a = a.lock();
            thread::sleep(Duration::from_millis(50));
            let _b = b.lock();
        });
    }

    {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || {
            let _b = b.lock();
            thread::sleep(Duration::from_millis(50));
            let _a = a.lock();
        });
    }

    // Give the watchdogs time to fire, then leave the deadlocked threads behind.
    thread::sleep(Duration::from_secs(1));
}
