use std::time::Duration;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;
use lockwatch::parkinglot;
use lockwatch::DebugConfig;
use lockwatch::Diagnostics;
use lockwatch::WaitSession;

fn lock_unlock(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_unlock");

    group.bench_function("parking_lot", |b| {
        let mutex = parkinglot::raw::Mutex::new(0u64);
        b.iter(|| *mutex.lock() += 1);
    });

    group.bench_function("disabled", |b| {
        let diagnostics = Diagnostics::new(DebugConfig::default());
        let mutex = parkinglot::mutex_with(&diagnostics, 0u64);
        b.iter(|| *mutex.lock() += 1);
    });

    group.bench_function("enabled", |b| {
        let diagnostics = Diagnostics::new(DebugConfig::enabled(Duration::from_secs(60)));
        let mutex = parkinglot::mutex_with(&diagnostics, 0u64);
        b.iter(|| *mutex.lock() += 1);
    });

    group.finish();
}

fn read_unlock(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_unlock");

    for enabled in [false, true] {
        group.bench_with_input(BenchmarkId::from_parameter(enabled), &enabled, |b, &enabled| {
            let diagnostics = Diagnostics::new(DebugConfig {
                enabled,
                timeout: Duration::from_secs(60),
            });
            let rwlock = parkinglot::rwlock_with(&diagnostics, 0u64);
            b.iter(|| *rwlock.read());
        });
    }

    group.finish();
}

fn session_round_trip(c: &mut Criterion) {
    let sessions = WaitSession::<u64, u64>::new();
    let mut key = 0u64;

    c.bench_function("session_round_trip", |b| {
        b.iter(|| {
            key += 1;
            sessions.add(key).unwrap();
            sessions.done(&key, key).unwrap();
            sessions.wait(&key, None).unwrap()
        })
    });
}

criterion_group!(benches, lock_unlock, read_unlock, session_round_trip);
criterion_main!(benches);
