//! A two-state latch for fibers, the base of every other primitive in the
//! crate.
//!
//! An event is either *set* or *not set* and keeps a FIFO list of waiting
//! fibers. A **manual** event stays set until [`reset`](Event::reset) and
//! releases every waiter when set. An **auto** event hands each `set` to
//! exactly one waiter: if somebody is waiting, that one fiber is released and
//! the event stays clear; otherwise the event latches set and the next wait
//! consumes it.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use crate::fiber::{sched, suspend, suspend_timeout, WakeReason, WakeRef};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Manual,
    Auto,
}

pub struct Event {
    mode: Mode,
    is_set: Cell<bool>,
    waiters: RefCell<VecDeque<WakeRef>>,
}

impl Event {
    pub fn new(mode: Mode) -> Event {
        Event {
            mode,
            is_set: Cell::new(false),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// A manual-reset event: `set` releases all waiters and latches.
    pub fn manual() -> Event {
        Event::new(Mode::Manual)
    }

    /// An auto-reset event: `set` releases exactly one waiter, or latches
    /// until the next wait if nobody is waiting.
    pub fn auto() -> Event {
        Event::new(Mode::Auto)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_set(&self) -> bool {
        self.is_set.get()
    }

    /// Signals the event. Does not yield; released fibers go to the tail of
    /// the ready queue in their wait order.
    pub fn set(&self) {
        match self.mode {
            Mode::Manual => {
                self.is_set.set(true);
                let mut waiters = self.waiters.borrow_mut();
                sched::with(|s| {
                    for w in waiters.drain(..) {
                        s.wake(w, WakeReason::Signal);
                    }
                });
            }
            Mode::Auto => {
                let mut waiters = self.waiters.borrow_mut();
                let woke = sched::with(|s| {
                    while let Some(w) = waiters.pop_front() {
                        if s.wake(w, WakeReason::Signal) {
                            return true;
                        }
                    }
                    false
                });
                if !woke {
                    self.is_set.set(true);
                }
            }
        }
    }

    /// Clears the event unconditionally. Pending waiters stay parked.
    pub fn reset(&self) {
        self.is_set.set(false);
    }

    /// Suspends the current fiber until the event is set. On an auto event a
    /// latched `set` is consumed by the returning waiter.
    pub fn wait(&self) {
        if self.consume_if_set() {
            return;
        }
        let w = sched::with(|s| s.wait_ref());
        self.waiters.borrow_mut().push_back(w);
        let reason = suspend();
        debug_assert_eq!(reason, WakeReason::Signal);
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `true` if the event
    /// was signaled and `false` on timeout; a timeout leaves the event state
    /// unchanged and removes the caller from the wait list.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.consume_if_set() {
            return true;
        }
        let w = sched::with(|s| s.wait_ref());
        self.waiters.borrow_mut().push_back(w);
        match suspend_timeout(timeout) {
            WakeReason::Signal => true,
            WakeReason::Timeout => {
                self.waiters.borrow_mut().retain(|x| *x != w);
                false
            }
            reason => unreachable!("unexpected wake reason {:?} on an event wait", reason),
        }
    }

    fn consume_if_set(&self) -> bool {
        if !self.is_set.get() {
            return false;
        }
        if self.mode == Mode::Auto {
            self.is_set.set(false);
        }
        true
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        debug_assert!(
            self.waiters.borrow().is_empty(),
            "event dropped with fibers still waiting on it"
        );
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("mode", &self.mode)
            .field("is_set", &self.is_set.get())
            .finish_non_exhaustive()
    }
}
