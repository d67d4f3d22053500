//! Monotonic progress marker with blocking waits.
//!
//! The gate lives in the producer's own memory. Consumers in other processes
//! never wait on it directly; they poll the progress word the producer
//! publishes next to the availability table.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct GateState<T> {
    current: T,
    /// Targets currently waited on, with the number of waiters per target.
    waiting: BTreeMap<T, usize>,
}

impl<T: Ord + Copy> GateState<T> {
    fn add_waiter(&mut self, target: T) {
        *self.waiting.entry(target).or_insert(0) += 1;
    }

    fn remove_waiter(&mut self, target: T) {
        if let Some(count) = self.waiting.get_mut(&target) {
            *count -= 1;
            if *count == 0 {
                self.waiting.remove(&target);
            }
        }
    }

    fn lowest_target(&self) -> Option<T> {
        self.waiting.keys().next().copied()
    }
}

/// A value that only ever moves forward, with wait-until-at-least semantics.
///
/// Any number of threads may wait on distinct targets at once. Advancing the
/// gate wakes every waiter whenever at least one target has been reached;
/// each waiter re-checks its own target under the lock, so a wakeup is never
/// lost even when `advance_to` races with the start of a wait.
pub struct MonotonicGate<T> {
    state: Mutex<GateState<T>>,
    advanced: Condvar,
}

impl<T: Ord + Copy> MonotonicGate<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(GateState {
                current: initial,
                waiting: BTreeMap::new(),
            }),
            advanced: Condvar::new(),
        }
    }

    pub fn current(&self) -> T {
        self.state.lock().current
    }

    /// Move the gate to `value`. No-op (returning false) unless `value` is
    /// strictly ahead of the current position.
    pub fn advance_to(&self, value: T) -> bool {
        let wake = {
            let mut state = self.state.lock();
            if value <= state.current {
                return false;
            }
            state.current = value;
            state.lowest_target().is_some_and(|lowest| lowest <= value)
        };
        if wake {
            self.advanced.notify_all();
        }
        true
    }

    /// Block until the gate is at or past `target`.
    pub fn wait_for(&self, target: T) {
        let mut state = self.state.lock();
        if state.current >= target {
            return;
        }
        state.add_waiter(target);
        while state.current < target {
            self.advanced.wait(&mut state);
        }
        state.remove_waiter(target);
    }

    /// Like [`wait_for`](Self::wait_for) but gives up after `timeout`.
    /// Returns whether the target was reached.
    pub fn wait_for_timeout(&self, target: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.current >= target {
            return true;
        }
        state.add_waiter(target);
        while state.current < target {
            if self.advanced.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let reached = state.current >= target;
        state.remove_waiter(target);
        reached
    }

    /// Number of threads currently blocked in a wait.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiting.values().sum()
    }
}

impl<T: Ord + Copy + Default> Default for MonotonicGate<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Ord + Copy + fmt::Debug> fmt::Debug for MonotonicGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MonotonicGate")
            .field("current", &state.current)
            .field("waiting_for", &state.lowest_target())
            .finish()
    }
}
