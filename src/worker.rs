//! The worker thread pool: blocking offload for fibers.
//!
//! Cooperative scheduling dies the moment the scheduler thread enters a
//! blocking syscall, so anything that cannot be made non-blocking (name
//! resolution, most prominently) is shipped to a fixed pool of OS threads.
//! From the calling fiber's point of view [`execute`] is synchronous: the
//! fiber parks, the job runs elsewhere, the result comes back through the
//! completion port.
//!
//! Worker threads never touch scheduler or primitive state. Their only side
//! effect is posting a completion.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::fiber::{self, sched, WakeReason};

type Job = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: Mutex<State>,
    cond: Condvar,
}

struct State {
    jobs: VecDeque<Job>,
    closed: bool,
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawning failure is fatal: a runtime without its worker threads could
    /// stall the whole scheduler on the first blocking call.
    pub fn start(threads: usize) -> WorkerPool {
        assert!(threads >= 1, "the worker pool needs at least one thread");
        let shared = Arc::new(Shared {
            queue: Mutex::new(State {
                jobs: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("fiberio-worker-{}", i))
                .spawn(move || worker_loop(shared))
                .unwrap_or_else(|e| panic!("cannot spawn a worker thread: {}", e));
            handles.push(handle);
        }
        log::debug!("worker pool started with {} threads", threads);
        WorkerPool { shared, handles }
    }

    pub fn submit(&self, job: Job) {
        let mut state = self.shared.queue.lock().expect("worker queue poisoned");
        debug_assert!(!state.closed);
        state.jobs.push_back(job);
        drop(state);
        self.shared.cond.notify_one();
    }

    /// Stops accepting jobs and joins every worker. Must be called with no
    /// job in flight, which the runtime shutdown drain guarantees.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.queue.lock().expect("worker queue poisoned");
            state.closed = true;
        }
        self.shared.cond.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        log::debug!("worker pool stopped");
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.queue.lock().expect("worker queue poisoned");
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.closed {
                    return;
                }
                state = shared.cond.wait(state).expect("worker queue poisoned");
            }
        };
        job();
    }
}

/// Pointer that is handed to exactly one worker job while its owner is
/// parked; the job is the only writer until the owner resumes.
struct AssertSend<T>(T);
unsafe impl<T> Send for AssertSend<T> {}

/// Runs `f` on a worker thread, suspending the calling fiber until the
/// result is available.
///
/// `f` may borrow from the caller's stack even though it crosses a thread
/// boundary: the calling fiber cannot resume (and therefore cannot release
/// the borrow) before the job has finished and posted its completion — the
/// same argument scoped threads rest on.
pub fn execute<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let mut result: Option<R> = None;
    let (wake, post) = sched::with(|s| (s.wait_ref(), s.port.post_handle()));

    let result_ptr = AssertSend(&mut result as *mut Option<R>);
    let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
        let out = f();
        unsafe { *result_ptr.0 = Some(out) };
        post.post(wake);
    });
    // The job cannot outlive this call: the fiber stays parked until the
    // completion arrives.
    let job: Job = unsafe { std::mem::transmute(job) };

    sched::with(|s| {
        s.adjust_outstanding(1);
        s.workers.submit(job);
    });
    let reason = fiber::suspend();
    sched::with(|s| s.adjust_outstanding(-1));
    debug_assert_eq!(reason, WakeReason::Signal);
    result.take().expect("worker job vanished without a result")
}
