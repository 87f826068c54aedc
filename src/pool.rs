//! A bounded pool of lazily constructed, reusable entries.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;

use crate::event::Event;

struct Slot<T> {
    value: Rc<T>,
    acquired: bool,
}

/// A bounded set of reusable entries with blocking acquire/release.
///
/// Entries are constructed on demand: [`acquire`](Self::acquire) builds a new
/// one only when every constructed entry is checked out and fewer than
/// `capacity` exist; beyond that it suspends until a [`release`](Self::release).
/// Entries live until the pool itself is dropped, so at no instant are more
/// than `capacity` entries in circulation.
pub struct Pool<T> {
    slots: RefCell<Vec<Slot<T>>>,
    free: RefCell<Vec<usize>>,
    capacity: usize,
    available: Event,
    ctor: Box<dyn Fn() -> T>,
}

/// An entry checked out of a [`Pool`]. Hand it back with
/// [`Pool::release`]; the handle derefs to the entry.
pub struct PoolItem<T> {
    value: Rc<T>,
    index: usize,
}

impl<T> Deref for PoolItem<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Pool<T> {
    pub fn new(capacity: usize, ctor: impl Fn() -> T + 'static) -> Pool<T> {
        assert!(capacity >= 1, "a pool needs capacity >= 1");
        Pool {
            slots: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            capacity,
            available: Event::auto(),
            ctor: Box::new(ctor),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many entries have been constructed so far.
    pub fn constructed(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Checks an entry out, suspending the current fiber when all
    /// `capacity` entries are constructed and in use.
    pub fn acquire(&self) -> PoolItem<T> {
        loop {
            if let Some(index) = self.free.borrow_mut().pop() {
                let mut slots = self.slots.borrow_mut();
                slots[index].acquired = true;
                return PoolItem {
                    value: Rc::clone(&slots[index].value),
                    index,
                };
            }
            if self.slots.borrow().len() < self.capacity {
                let value = Rc::new((self.ctor)());
                let mut slots = self.slots.borrow_mut();
                let index = slots.len();
                slots.push(Slot {
                    value: Rc::clone(&value),
                    acquired: true,
                });
                return PoolItem { value, index };
            }
            self.available.wait();
        }
    }

    /// Returns an entry to the pool, waking at most one blocked
    /// [`acquire`](Self::acquire).
    pub fn release(&self, item: PoolItem<T>) {
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[item.index];
        assert!(
            slot.acquired && Rc::ptr_eq(&slot.value, &item.value),
            "released an entry that does not belong to this pool"
        );
        slot.acquired = false;
        drop(slots);
        self.free.borrow_mut().push(item.index);
        self.available.set();
    }

    /// Visits every constructed entry with a flag telling whether it is
    /// currently checked out. The snapshot is taken up front, so the visitor
    /// may suspend; it must not acquire from or release to this pool.
    pub fn for_each_entry(&self, mut f: impl FnMut(&T, bool)) {
        let snapshot: Vec<(Rc<T>, bool)> = self
            .slots
            .borrow()
            .iter()
            .map(|slot| (Rc::clone(&slot.value), slot.acquired))
            .collect();
        for (value, acquired) in snapshot {
            f(&value, acquired);
        }
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        debug_assert!(
            self.slots.borrow().iter().all(|slot| !slot.acquired),
            "pool dropped with entries still acquired"
        );
    }
}
