// MonotonicGate under contention: no lost wakeups, monotonic observations.
use station_ingest::MonotonicGate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_many_waiters_many_targets() {
    let gate = Arc::new(MonotonicGate::new(0u64));
    let handles: Vec<_> = (1..=32u64)
        .map(|i| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let target = i * 31 % 1000;
                assert!(gate.wait_for_timeout(target, Duration::from_secs(10)));
                assert!(gate.current() >= target);
            })
        })
        .collect();

    for v in (0..=1000u64).step_by(7) {
        gate.advance_to(v);
    }
    gate.advance_to(1000);

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(gate.waiters(), 0);
}

#[test]
fn test_advance_racing_wait_start() {
    // Each round starts a wait and an advance at the same time; the wait
    // must return regardless of which one takes the lock first.
    for round in 1..=200u64 {
        let gate = Arc::new(MonotonicGate::new(round - 1));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_timeout(round, Duration::from_secs(5)))
        };
        gate.advance_to(round);
        assert!(waiter.join().unwrap(), "lost wakeup in round {round}");
    }
}

#[test]
fn test_observations_never_go_backwards() {
    let gate = Arc::new(MonotonicGate::new(0u64));
    let highest = Arc::new(AtomicU64::new(0));

    let advancers: Vec<_> = (0..4)
        .map(|t| {
            let gate = Arc::clone(&gate);
            let highest = Arc::clone(&highest);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    let v = fastrand::u64(0..10_000) + t;
                    gate.advance_to(v);
                    highest.fetch_max(v, Ordering::Relaxed);
                    if i % 100 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let observer = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..10_000 {
                let now = gate.current();
                assert!(now >= last, "gate went from {last} to {now}");
                last = now;
            }
        })
    };

    for handle in advancers {
        handle.join().unwrap();
    }
    observer.join().unwrap();
    assert_eq!(gate.current(), highest.load(Ordering::Relaxed));
}
