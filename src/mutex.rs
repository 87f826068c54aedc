//! A lock for the cooperative multitasking environment.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::fiber::{sched, suspend, WakeReason, WakeRef};
use crate::fiber::sched::FiberId;

////////////////////////////////////////////////////////////////////////////////
// Mutex
////////////////////////////////////////////////////////////////////////////////

/// A mutual exclusion primitive protecting shared data between fibers.
///
/// Uncontended lock and unlock are constant-time and do not yield. A
/// contended [`lock`](Self::lock) parks the caller FIFO; unlock hands
/// ownership directly to the oldest waiter, so fibers acquire the mutex in
/// exactly the order they asked for it and a fresh caller cannot barge in
/// front of parked ones.
pub struct Mutex<T: ?Sized> {
    owner: Cell<Option<FiberId>>,
    waiters: RefCell<VecDeque<WakeRef>>,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Mutex<T> {
        Mutex {
            owner: Cell::new(None),
            waiters: RefCell::new(VecDeque::new()),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, yielding the current fiber until it is able to do
    /// so. Returns an RAII guard that releases the lock when dropped.
    ///
    /// Locking a mutex already held by the current fiber is a precondition
    /// violation and panics (it could never make progress).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let me = sched::with(|s| s.current_id());
        match self.owner.get() {
            None => self.owner.set(Some(me)),
            Some(owner) if owner == me => {
                panic!("mutex deadlock: lock() called by the owning fiber")
            }
            Some(_) => {
                let w = sched::with(|s| s.wait_ref());
                self.waiters.borrow_mut().push_back(w);
                let reason = suspend();
                debug_assert_eq!(reason, WakeReason::Signal);
                debug_assert_eq!(self.owner.get(), Some(me));
            }
        }
        MutexGuard { lock: self }
    }

    /// Attempts to acquire this lock without yielding. Returns `None` if the
    /// mutex is held by another fiber.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let me = sched::with(|s| s.current_id());
        match self.owner.get() {
            None => {
                self.owner.set(Some(me));
                Some(MutexGuard { lock: self })
            }
            Some(owner) if owner == me => {
                panic!("mutex deadlock: try_lock() called by the owning fiber")
            }
            Some(_) => None,
        }
    }

    /// Immediately drops the guard, and consequently unlocks the mutex.
    pub fn unlock(guard: MutexGuard<'_, T>) {
        drop(guard);
    }

    /// Returns a mutable reference to the underlying data. No locking takes
    /// place: the mutable borrow statically guarantees exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release(&self) {
        let next = sched::with(|s| {
            let mut waiters = self.waiters.borrow_mut();
            while let Some(w) = waiters.pop_front() {
                if s.wake(w, WakeReason::Signal) {
                    return Some(w.fiber);
                }
            }
            None
        });
        self.owner.set(next);
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(t: T) -> Self {
        Mutex::new(t)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        if self.owner.get().is_none() {
            d.field("data", unsafe { &&*self.data.get() });
        } else {
            struct LockedPlaceholder;
            impl fmt::Debug for LockedPlaceholder {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("<locked>")
                }
            }
            d.field("data", &LockedPlaceholder);
        }
        d.finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// MutexGuard
////////////////////////////////////////////////////////////////////////////////

/// An RAII implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope), the lock will be unlocked.
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
}

impl<'a, T: ?Sized + 'a> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
