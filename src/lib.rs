//! A cooperative fiber runtime with completion-port I/O and an RPC service
//! framework.
//!
//! This library contains the following modules:
//!
//! - [Runtime lifecycle](runtime): one scheduler per thread, bracketed by
//!   init and shutdown
//! - [Fibers](fiber): create, start and join cooperative execution contexts,
//!   sleep, yield, and the reusable fiber pool
//! - [Worker pool](worker): synchronous-looking offload of blocking calls to
//!   OS threads
//! - [Events](event), [mutexes](mutex) and [semaphores](semaphore):
//!   synchronization primitives built on fiber suspend/resume, with optional
//!   timeouts
//! - [Blocking queue and stack](queue): bounded containers with blocking put
//!   and take
//! - [Object pool](pool): bounded lazily-constructed pool of reusable
//!   entries
//! - [Fiber-aware TCP](net): stream sockets whose read/write/connect/accept
//!   appear blocking from a fiber
//! - [RPC framework](rpc): method tables, wire framing, server-side dispatch
//!   and client-side calls
//! - [Clock](clock) and [error handling](error)
//!
//! Scheduling is strictly single-threaded cooperative: at most one fiber
//! executes at any instant, and a fiber gives up the processor only at a
//! suspension point. Parallelism exists only in the worker thread pool and in
//! the kernel completing I/O; both communicate with the scheduler exclusively
//! by posting completions to the completion port.
//!
//! ```no_run
//! use fiberio::{fiber, Runtime};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let rt = Runtime::new();
//! let counter = Rc::new(Cell::new(0));
//!
//! let mut fibers: Vec<_> = (0..10)
//!     .map(|i| {
//!         let counter = counter.clone();
//!         fiber::Fiber::new(&format!("worker-{}", i), move || {
//!             counter.set(counter.get() + 1);
//!         })
//!     })
//!     .collect();
//! for f in &mut fibers {
//!     f.start();
//! }
//! for f in fibers {
//!     f.join();
//! }
//!
//! assert_eq!(counter.get(), 10);
//! rt.shutdown();
//! ```

pub mod clock;
pub mod error;
pub mod event;
pub mod fiber;
pub mod mutex;
pub mod net;
pub mod pool;
pub mod queue;
pub mod rpc;
pub mod runtime;
pub mod semaphore;
pub mod worker;

mod port;

pub use error::{Error, Result};
pub use runtime::Runtime;
