//! Cooperative multitasking module.
//!
//! With the fiber module you can create, start and join [fibers](Fiber) —
//! independently scheduled units of cooperative execution multiplexed on the
//! runtime thread — put them to [sleep], [yield](yield_now) between them, and
//! run short-lived tasks on the built-in reusable fiber pool with
//! [execute_async].
//!
//! Exactly one fiber runs at any instant. A fiber gives up the processor only
//! at a suspension point: an event/mutex/semaphore wait, a blocking container
//! or pool operation, an I/O call, a worker-pool offload, a sleep or an
//! explicit yield. Between suspension points fiber execution is atomic with
//! respect to all other fibers.

use std::time::Duration;

pub(crate) mod context;
pub(crate) mod sched;

pub(crate) use sched::{suspend, suspend_timeout, WakeReason, WakeRef};

use sched::FiberId;

////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////

/// Fiber factory which can be used to configure the properties of the new
/// fiber.
///
/// Methods can be chained on it in order to configure it:
///
/// * `name`:       an associated name for diagnostics
/// * `stack_size`: the stack size for the new fiber
///
/// ```no_run
/// use fiberio::fiber;
///
/// let mut f = fiber::Builder::new()
///     .name("worker")
///     .stack_size(128 * 1024)
///     .proc(|| println!("hi"))
///     .build();
/// f.start();
/// f.join();
/// ```
pub struct Builder<F> {
    name: Option<String>,
    stack_size: Option<usize>,
    f: F,
}

/// A *typestate* helper representing a [`Builder`] that has not been given a
/// fiber function yet.
pub struct NoFunc;

impl Builder<NoFunc> {
    pub fn new() -> Self {
        Builder {
            name: None,
            stack_size: None,
            f: NoFunc,
        }
    }

    /// Sets the callee function for the new fiber.
    pub fn proc<F>(self, f: F) -> Builder<F>
    where
        F: FnOnce() + 'static,
    {
        Builder {
            name: self.name,
            stack_size: self.stack_size,
            f,
        }
    }
}

impl Default for Builder<NoFunc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Builder<F> {
    /// Names the fiber-to-be.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the size of the stack (in bytes) for the new fiber.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

impl<F> Builder<F>
where
    F: FnOnce() + 'static,
{
    /// Creates the fiber in the **created** state; it does not run until
    /// [`Fiber::start`] is called.
    pub fn build(self) -> Fiber {
        let Builder {
            name,
            stack_size,
            f,
        } = self;
        let name = name.unwrap_or_else(|| "<fiber>".into());
        let id = sched::with(|s| {
            let stack_size = stack_size.unwrap_or(s.default_stack_size);
            s.create_fiber(&name, stack_size, Box::new(f), false)
        });
        Fiber {
            id,
            started: false,
            joined: false,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Fiber
////////////////////////////////////////////////////////////////////////////////

/// A fiber: an independently schedulable cooperative execution context with
/// its own stack.
///
/// A fiber has three externally visible states: **created**, **started** and
/// **finished**. [`start`](Self::start) schedules it at the tail of the ready
/// queue (the current fiber keeps running until its next suspension point);
/// [`join`](Self::join) suspends the caller until the fiber function returns
/// and then releases the fiber's resources.
///
/// Dropping a fiber that was never started releases its resources
/// immediately. Dropping a started fiber without joining it is a bug and
/// panics, the same way the runtime's join handles must not be leaked.
pub struct Fiber {
    id: FiberId,
    started: bool,
    joined: bool,
}

impl Fiber {
    /// Creates a new fiber with default attributes. Shorthand for
    /// [`Builder::new().name(name).proc(f).build()`](Builder).
    pub fn new<F>(name: &str, f: F) -> Fiber
    where
        F: FnOnce() + 'static,
    {
        Builder::new().name(name).proc(f).build()
    }

    /// Transitions the fiber to the ready state. The fiber will get the
    /// processor no earlier than the caller's next suspension point.
    pub fn start(&mut self) {
        assert!(!self.started, "fiber started twice");
        self.started = true;
        sched::with(|s| s.start_fiber(self.id));
    }

    /// Waits until the fiber function has run to completion, then releases
    /// the fiber's stack. Each fiber may be joined by exactly one caller.
    pub fn join(mut self) {
        assert!(self.started, "joining a fiber that was never started");
        let finished = sched::with(|s| s.fiber_finished(self.id));
        if !finished {
            sched::with(|s| {
                let w = s.wait_ref();
                s.set_joiner(self.id, w);
            });
            let reason = suspend();
            debug_assert_eq!(reason, WakeReason::Signal);
        }
        let task = sched::with(|s| s.release_fiber(self.id));
        drop(task);
        self.joined = true;
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if !self.started {
            let task = sched::try_with(|s| s.release_fiber(self.id));
            drop(task);
        } else if !self.joined {
            panic!("a started fiber was dropped without being joined");
        }
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber").finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Free functions
////////////////////////////////////////////////////////////////////////////////

/// Puts the current fiber to sleep for at least `time`.
///
/// Yields control to the scheduler; other ready fibers run in the meantime.
pub fn sleep(time: Duration) {
    let reason = suspend_timeout(time);
    debug_assert_eq!(reason, WakeReason::Timeout);
}

/// Reschedules the current fiber to the tail of the ready queue, giving every
/// other ready fiber a chance to run first.
pub fn yield_now() {
    sched::yield_now();
}

/// Runs `f` asynchronously on a fiber from the runtime's reusable fiber pool.
///
/// The pool grows lazily and parks finished fibers for reuse. Submission does
/// not yield: `f` starts no earlier than the caller's next suspension point,
/// and is guaranteed to have completed by the time the runtime shuts down.
pub fn execute_async<F>(f: F)
where
    F: FnOnce() + 'static,
{
    sched::with(|s| s.pool_submit(Box::new(f)));
}
