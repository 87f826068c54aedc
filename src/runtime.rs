//! Runtime lifecycle: one scheduler per thread, bracketed by init/shutdown.
//!
//! ```no_run
//! use fiberio::Runtime;
//!
//! let rt = Runtime::new();
//! // ... create fibers, use primitives ...
//! rt.shutdown();
//! ```
//!
//! The constructing thread becomes the scheduler thread and its call stack
//! becomes the main fiber. [`Runtime::shutdown`] returns only after every
//! started fiber (including fiber-pool tasks) has run to completion and no
//! timer or I/O registration remains.

use std::marker::PhantomData;

use crate::fiber::sched::{self, Scheduler};
use crate::port::CompletionPort;
use crate::worker::WorkerPool;

const DEFAULT_WORKER_THREADS: usize = 4;
const DEFAULT_FIBER_STACK_SIZE: usize = 256 * 1024;

/// Runtime factory with configurable properties.
#[derive(Debug, Clone)]
pub struct Builder {
    worker_threads: usize,
    fiber_stack_size: usize,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            worker_threads: DEFAULT_WORKER_THREADS,
            fiber_stack_size: DEFAULT_FIBER_STACK_SIZE,
        }
    }

    /// Number of OS threads in the blocking-offload worker pool.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Default stack size for fibers that don't request one explicitly.
    pub fn fiber_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    /// Initializes the runtime on the current thread.
    ///
    /// Panics if a runtime is already active on this thread or if the
    /// completion port or worker threads cannot be created (resource
    /// exhaustion at init is fatal).
    pub fn build(self) -> Runtime {
        let port = CompletionPort::new()
            .unwrap_or_else(|e| panic!("cannot create the completion port: {}", e));
        let workers = WorkerPool::start(self.worker_threads);
        sched::install(Scheduler::new(port, workers, self.fiber_stack_size));
        log::debug!("fiberio runtime initialized");
        Runtime {
            active: true,
            _not_send: PhantomData,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the runtime active on the current thread.
///
/// Dropping the handle performs the same drain as [`shutdown`](Self::shutdown)
/// (skipped while unwinding from a panic, when orderly draining is hopeless).
pub struct Runtime {
    active: bool,
    _not_send: PhantomData<*mut ()>,
}

impl Runtime {
    /// Initializes a runtime with default parameters on the current thread.
    pub fn new() -> Runtime {
        Builder::new().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Runs every remaining fiber to completion, then tears the runtime
    /// down.
    ///
    /// Returns only after the ready queue is empty, no timers remain, no
    /// fiber is blocked and the completion port has no outstanding
    /// registrations. Idle fiber-pool contexts are told to exit and joined;
    /// worker threads are joined. A fiber blocked on something that can
    /// never fire is a deadlock and panics.
    pub fn shutdown(mut self) {
        self.active = false;
        drain();
        teardown();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if std::thread::panicking() {
            if sched::is_active() {
                teardown();
            }
            return;
        }
        drain();
        teardown();
    }
}

/// The shutdown drain, run on the main fiber. The main fiber stays runnable
/// throughout and acts as the dispatcher whenever nothing else is ready.
fn drain() {
    loop {
        if sched::with(|s| s.has_ready()) {
            crate::fiber::yield_now();
            continue;
        }
        sched::fire_timers_now();
        let (timers, outstanding, live, idle) = sched::with(|s| {
            (
                s.has_timers(),
                s.has_outstanding(),
                s.live_fibers(),
                s.pool_idle_count(),
            )
        });
        if sched::with(|s| s.has_ready()) {
            continue;
        }
        if timers || outstanding {
            sched::poll_step(sched::with(|s| s.next_poll_timeout()));
            continue;
        }
        if live == 0 {
            break;
        }
        if live == idle && idle > 0 {
            sched::with(|s| s.pool_shutdown());
            continue;
        }
        panic!(
            "shutdown with {} fiber(s) blocked on something that can never \
             fire",
            live - idle
        );
    }
}

fn teardown() {
    let mut sched = sched::uninstall();
    sched.workers.shutdown();
    log::debug!("fiberio runtime shut down");
}
