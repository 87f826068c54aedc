//! Bounded blocking containers: a FIFO queue and a LIFO stack.
//!
//! Both are parameterized by a capacity `C >= 1` and hold `0 <= len <= C`
//! elements at every suspension point. A full container blocks producers, an
//! empty one blocks consumers; each successful insertion signals the
//! non-empty event once and each successful removal signals the non-full
//! event once, so no wakeup can be lost.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::event::Event;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    Fifo,
    Lifo,
}

struct Bounded<T> {
    items: RefCell<VecDeque<T>>,
    capacity: usize,
    order: Order,
    not_full: Event,
    not_empty: Event,
}

impl<T> Bounded<T> {
    fn new(capacity: usize, order: Order) -> Self {
        assert!(capacity >= 1, "a blocking container needs capacity >= 1");
        Bounded {
            items: RefCell::new(VecDeque::with_capacity(capacity)),
            capacity,
            order,
            not_full: Event::auto(),
            not_empty: Event::auto(),
        }
    }

    fn len(&self) -> usize {
        self.items.borrow().len()
    }

    fn insert(&self, t: T) {
        self.items.borrow_mut().push_back(t);
        self.not_empty.set();
    }

    fn remove(&self) -> T {
        let t = match self.order {
            Order::Fifo => self.items.borrow_mut().pop_front(),
            Order::Lifo => self.items.borrow_mut().pop_back(),
        };
        self.not_full.set();
        t.expect("removing from an empty container")
    }

    fn put(&self, t: T) {
        while self.len() == self.capacity {
            self.not_full.wait();
        }
        self.insert(t);
    }

    fn put_timeout(&self, t: T, timeout: Duration) -> Result<(), T> {
        while self.len() == self.capacity {
            if !self.not_full.wait_timeout(timeout) {
                return Err(t);
            }
        }
        self.insert(t);
        Ok(())
    }

    fn try_put(&self, t: T) -> Result<(), T> {
        if self.len() == self.capacity {
            return Err(t);
        }
        self.insert(t);
        Ok(())
    }

    fn take(&self) -> T {
        while self.len() == 0 {
            self.not_empty.wait();
        }
        self.remove()
    }

    fn take_timeout(&self, timeout: Duration) -> Option<T> {
        while self.len() == 0 {
            if !self.not_empty.wait_timeout(timeout) {
                return None;
            }
        }
        Some(self.remove())
    }

    fn try_take(&self) -> Option<T> {
        if self.len() == 0 {
            return None;
        }
        Some(self.remove())
    }
}

////////////////////////////////////////////////////////////////////////////////
// BlockingQueue
////////////////////////////////////////////////////////////////////////////////

/// A bounded FIFO with blocking [`put`](Self::put) and [`take`](Self::take).
pub struct BlockingQueue<T>(Bounded<T>);

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BlockingQueue(Bounded::new(capacity, Order::Fifo))
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `t`, suspending the current fiber while the queue is full.
    pub fn put(&self, t: T) {
        self.0.put(t)
    }

    /// Like [`put`](Self::put) with a deadline; hands the value back on
    /// timeout, leaving the queue unchanged.
    pub fn put_timeout(&self, t: T, timeout: Duration) -> Result<(), T> {
        self.0.put_timeout(t, timeout)
    }

    pub fn try_put(&self, t: T) -> Result<(), T> {
        self.0.try_put(t)
    }

    /// Removes the oldest element, suspending the current fiber while the
    /// queue is empty.
    pub fn take(&self) -> T {
        self.0.take()
    }

    /// Like [`take`](Self::take) with a deadline; `None` on timeout, leaving
    /// the queue unchanged.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        self.0.take_timeout(timeout)
    }

    pub fn try_take(&self) -> Option<T> {
        self.0.try_take()
    }
}

////////////////////////////////////////////////////////////////////////////////
// BlockingStack
////////////////////////////////////////////////////////////////////////////////

/// A bounded LIFO with blocking [`push`](Self::push) and [`pop`](Self::pop).
pub struct BlockingStack<T>(Bounded<T>);

impl<T> BlockingStack<T> {
    pub fn new(capacity: usize) -> Self {
        BlockingStack(Bounded::new(capacity, Order::Lifo))
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `t`, suspending the current fiber while the stack is full.
    pub fn push(&self, t: T) {
        self.0.put(t)
    }

    /// Like [`push`](Self::push) with a deadline; hands the value back on
    /// timeout, leaving the stack unchanged.
    pub fn push_timeout(&self, t: T, timeout: Duration) -> Result<(), T> {
        self.0.put_timeout(t, timeout)
    }

    pub fn try_push(&self, t: T) -> Result<(), T> {
        self.0.try_put(t)
    }

    /// Removes the top element, suspending the current fiber while the stack
    /// is empty.
    pub fn pop(&self) -> T {
        self.0.take()
    }

    /// Like [`pop`](Self::pop) with a deadline; `None` on timeout, leaving
    /// the stack unchanged.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.0.take_timeout(timeout)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.0.try_take()
    }
}
