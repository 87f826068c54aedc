//! A counting semaphore for fibers.

use std::cell::Cell;
use std::time::Duration;

use crate::event::Event;

/// A non-negative counter with blocking decrement.
///
/// Internally an auto-reset [`Event`] wakes one waiter per [`up`](Self::up);
/// a waiter that leaves the counter positive re-signals the event so the wake
/// cascades to the next waiter instead of getting lost against the
/// auto-reset semantics.
pub struct Semaphore {
    value: Cell<u64>,
    event: Event,
}

impl Semaphore {
    pub fn new(value: u64) -> Semaphore {
        Semaphore {
            value: Cell::new(value),
            event: Event::auto(),
        }
    }

    pub fn value(&self) -> u64 {
        self.value.get()
    }

    /// Increments the counter, releasing one blocked [`down`](Self::down) if
    /// there is one. Does not yield.
    pub fn up(&self) {
        let value = self.value.get() + 1;
        self.value.set(value);
        if value == 1 {
            self.event.set();
        }
    }

    /// Decrements the counter, suspending the current fiber while it is
    /// zero.
    pub fn down(&self) {
        while self.value.get() == 0 {
            self.event.wait();
        }
        self.decrement();
    }

    /// Like [`down`](Self::down) with a deadline per wait. Returns `false`
    /// iff the event wait times out before a positive counter is observed;
    /// the counter is left unchanged in that case.
    pub fn down_timeout(&self, timeout: Duration) -> bool {
        while self.value.get() == 0 {
            if !self.event.wait_timeout(timeout) {
                return false;
            }
        }
        self.decrement();
        true
    }

    /// Non-blocking [`down`](Self::down). Returns `false` if the counter is
    /// zero.
    pub fn try_down(&self) -> bool {
        if self.value.get() == 0 {
            return false;
        }
        self.decrement();
        true
    }

    fn decrement(&self) {
        let value = self.value.get() - 1;
        self.value.set(value);
        if value > 0 {
            self.event.set();
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value.get())
            .finish_non_exhaustive()
    }
}
