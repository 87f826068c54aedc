//! The scheduler: fiber slots, the ready queue, timers and the dispatch loop.
//!
//! Exactly one scheduler exists per runtime thread. All of its state is
//! private to that thread; the completion port is the only object other
//! threads may touch (and then only to post completions). Fibers therefore
//! observe scheduler and primitive state as if inside a critical section
//! between two suspension points.

use std::cell::UnsafeCell;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::fiber::context::{self, Context, Stack};
use crate::port::CompletionPort;
use crate::worker::WorkerPool;

/// Opaque fiber identity: slot index plus a generation that is bumped every
/// time the slot is reused, so a stale id can never reach a different fiber.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub(crate) struct FiberId {
    pub index: usize,
    pub gen: u64,
}

/// A single wakeup permit. The token snapshots the fiber's wake counter at
/// park time; a wake delivered with a stale token is a no-op. This is what
/// lets an event signal, a timer expiry and an I/O completion race for the
/// same sleeper while exactly one of them wins.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct WakeRef {
    pub fiber: FiberId,
    pub token: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WakeReason {
    Signal,
    Timeout,
    Cancelled,
    Shutdown,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FiberState {
    Created,
    Ready,
    Running,
    Blocked,
    Finished,
    Free,
}

enum FiberKind {
    Main,
    Plain,
    Pooled,
}

type TimerKey = (Instant, u64);

struct FiberSlot {
    gen: u64,
    state: FiberState,
    kind: FiberKind,
    name: String,
    ctx: Box<Context>,
    stack: Option<Stack>,
    task: Option<Box<dyn FnOnce()>>,
    joiner: Option<WakeRef>,
    wake_token: u64,
    wake_reason: WakeReason,
    timer: Option<TimerKey>,
}

pub(crate) struct Scheduler {
    fibers: Vec<FiberSlot>,
    free_slots: Vec<usize>,
    ready: VecDeque<usize>,
    current: usize,
    timers: BTreeMap<TimerKey, WakeRef>,
    timer_seq: u64,
    /// Started fibers that have not finished yet (the main fiber excluded).
    live_fibers: usize,
    /// Fibers parked on a port-delivered wake (I/O waits and worker jobs).
    outstanding: usize,
    /// Parked reusable fibers of the fiber-pool, oldest first.
    pool_idle: Vec<WakeRef>,
    pub port: CompletionPort,
    pub workers: WorkerPool,
    pub default_stack_size: usize,
}

thread_local! {
    static SCHED: UnsafeCell<Option<Scheduler>> = UnsafeCell::new(None);
}

/// Runs `f` with the thread's scheduler. The reference must not be held
/// across a context switch, which is guaranteed by construction: the closure
/// returns before any switch can happen.
pub(crate) fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHED.with(|cell| {
        let slot = unsafe { &mut *cell.get() };
        let sched = slot
            .as_mut()
            .expect("no active fiberio runtime on this thread");
        f(sched)
    })
}

pub(crate) fn try_with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    SCHED.with(|cell| {
        let slot = unsafe { &mut *cell.get() };
        slot.as_mut().map(f)
    })
}

pub(crate) fn is_active() -> bool {
    SCHED.with(|cell| unsafe { (*cell.get()).is_some() })
}

pub(crate) fn install(sched: Scheduler) {
    SCHED.with(|cell| {
        let slot = unsafe { &mut *cell.get() };
        assert!(
            slot.is_none(),
            "a fiberio runtime is already active on this thread"
        );
        *slot = Some(sched);
    });
}

pub(crate) fn uninstall() -> Scheduler {
    SCHED.with(|cell| {
        let slot = unsafe { &mut *cell.get() };
        slot.take().expect("no active fiberio runtime to tear down")
    })
}

impl Scheduler {
    pub fn new(port: CompletionPort, workers: WorkerPool, default_stack_size: usize) -> Scheduler {
        let main = FiberSlot {
            gen: 0,
            state: FiberState::Running,
            kind: FiberKind::Main,
            name: "main".into(),
            ctx: Box::new(Context::new()),
            stack: None,
            task: None,
            joiner: None,
            wake_token: 0,
            wake_reason: WakeReason::Signal,
            timer: None,
        };
        Scheduler {
            fibers: vec![main],
            free_slots: Vec::new(),
            ready: VecDeque::new(),
            current: 0,
            timers: BTreeMap::new(),
            timer_seq: 0,
            live_fibers: 0,
            outstanding: 0,
            pool_idle: Vec::new(),
            port,
            workers,
            default_stack_size,
        }
    }

    pub fn current_id(&self) -> FiberId {
        FiberId {
            index: self.current,
            gen: self.fibers[self.current].gen,
        }
    }

    /// A wake permit for the current fiber, valid until the next wakeup.
    pub fn wait_ref(&self) -> WakeRef {
        WakeRef {
            fiber: self.current_id(),
            token: self.fibers[self.current].wake_token,
        }
    }

    /// Delivers a wakeup. Returns false if the permit is stale (the fiber is
    /// gone, already running, or was woken through another permit first).
    pub fn wake(&mut self, w: WakeRef, reason: WakeReason) -> bool {
        let slot = match self.fibers.get_mut(w.fiber.index) {
            Some(slot) if slot.gen == w.fiber.gen => slot,
            _ => return false,
        };
        if slot.state != FiberState::Blocked || slot.wake_token != w.token {
            return false;
        }
        slot.wake_token += 1;
        slot.wake_reason = reason;
        slot.state = FiberState::Ready;
        if let Some(key) = slot.timer.take() {
            if reason != WakeReason::Timeout {
                self.timers.remove(&key);
            }
        }
        self.ready.push_back(w.fiber.index);
        true
    }

    pub fn add_timer(&mut self, deadline: Instant, w: WakeRef) -> TimerKey {
        self.timer_seq += 1;
        let key = (deadline, self.timer_seq);
        self.timers.insert(key, w);
        key
    }

    /// Arms a timeout for the current fiber; it is disarmed automatically if
    /// the fiber is woken through any other permit.
    pub fn arm_timeout(&mut self, timeout: Duration) {
        let w = self.wait_ref();
        let key = self.add_timer(Instant::now() + timeout, w);
        self.fibers[self.current].timer = Some(key);
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|&(deadline, _)| deadline)
    }

    /// How long the shutdown drain may block in the port without missing a
    /// timer; `None` when no timer is armed.
    pub fn next_poll_timeout(&self) -> Option<Duration> {
        self.next_timer_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn fire_due_timers(&mut self, now: Instant) {
        loop {
            let key = match self.timers.keys().next() {
                Some(&key) if key.0 <= now => key,
                _ => return,
            };
            let w = self.timers.remove(&key).unwrap();
            self.wake(w, WakeReason::Timeout);
        }
    }

    fn alloc_slot(&mut self) -> usize {
        match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.fibers.push(FiberSlot {
                    gen: 0,
                    state: FiberState::Free,
                    kind: FiberKind::Plain,
                    name: String::new(),
                    ctx: Box::new(Context::new()),
                    stack: None,
                    task: None,
                    joiner: None,
                    wake_token: 0,
                    wake_reason: WakeReason::Signal,
                    timer: None,
                });
                self.fibers.len() - 1
            }
        }
    }

    pub fn create_fiber(
        &mut self,
        name: &str,
        stack_size: usize,
        task: Box<dyn FnOnce()>,
        pooled: bool,
    ) -> FiberId {
        let stack = Stack::new(stack_size);
        let ctx = context::prepare(&stack, fiber_main);
        let index = self.alloc_slot();
        let slot = &mut self.fibers[index];
        slot.state = FiberState::Created;
        slot.kind = if pooled {
            FiberKind::Pooled
        } else {
            FiberKind::Plain
        };
        slot.name = name.to_string();
        *slot.ctx = ctx;
        slot.stack = Some(stack);
        slot.task = Some(task);
        slot.joiner = None;
        slot.timer = None;
        FiberId {
            index,
            gen: slot.gen,
        }
    }

    /// Created -> Ready; the fiber goes to the ready-queue tail and runs no
    /// earlier than the caller's next suspension point.
    pub fn start_fiber(&mut self, id: FiberId) {
        let slot = &mut self.fibers[id.index];
        assert!(slot.gen == id.gen && slot.state == FiberState::Created);
        slot.state = FiberState::Ready;
        self.ready.push_back(id.index);
        self.live_fibers += 1;
    }

    pub fn fiber_finished(&self, id: FiberId) -> bool {
        let slot = &self.fibers[id.index];
        slot.gen == id.gen && slot.state == FiberState::Finished
    }

    pub fn set_joiner(&mut self, id: FiberId, w: WakeRef) {
        let slot = &mut self.fibers[id.index];
        debug_assert!(slot.gen == id.gen && slot.joiner.is_none());
        slot.joiner = Some(w);
    }

    /// Frees a Created or Finished slot, releasing its stack. The unrun task
    /// (if any) is handed back so the caller drops it outside the scheduler
    /// borrow: its destructor may itself reach for the scheduler.
    pub fn release_fiber(&mut self, id: FiberId) -> Option<Box<dyn FnOnce()>> {
        let slot = &mut self.fibers[id.index];
        debug_assert!(slot.gen == id.gen);
        debug_assert!(matches!(
            slot.state,
            FiberState::Created | FiberState::Finished
        ));
        slot.state = FiberState::Free;
        slot.gen += 1;
        slot.stack = None;
        let task = slot.task.take();
        slot.joiner = None;
        slot.name.clear();
        self.free_slots.push(id.index);
        task
    }

    pub fn adjust_outstanding(&mut self, delta: isize) {
        if delta > 0 {
            self.outstanding += delta as usize;
        } else {
            self.outstanding -= (-delta) as usize;
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // fiber pool
    ////////////////////////////////////////////////////////////////////////

    pub fn pool_submit(&mut self, task: Box<dyn FnOnce()>) {
        if let Some(w) = self.pool_idle.pop() {
            self.fibers[w.fiber.index].task = Some(task);
            let woken = self.wake(w, WakeReason::Signal);
            debug_assert!(woken, "an idle pooled fiber must accept a wake");
        } else {
            let id = self.create_fiber("fiber-pool", self.default_stack_size, task, true);
            self.start_fiber(id);
        }
    }

    fn pool_park(&mut self) {
        let w = self.wait_ref();
        self.pool_idle.push(w);
    }

    pub fn pool_idle_count(&self) -> usize {
        self.pool_idle.len()
    }

    pub fn pool_shutdown(&mut self) {
        let idle = std::mem::take(&mut self.pool_idle);
        for w in idle {
            self.wake(w, WakeReason::Shutdown);
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // shutdown bookkeeping
    ////////////////////////////////////////////////////////////////////////

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding > 0
    }

    pub fn live_fibers(&self) -> usize {
        self.live_fibers
    }
}

////////////////////////////////////////////////////////////////////////////////
// suspension and dispatch
////////////////////////////////////////////////////////////////////////////////

/// Parks the current fiber until some holder of its wake permit delivers a
/// wakeup. The caller must have registered the permit (wait list, timer,
/// overlap or worker job) before calling; nothing else can run in between.
pub(crate) fn suspend() -> WakeReason {
    with(|s| {
        let cur = s.current;
        debug_assert_eq!(s.fibers[cur].state, FiberState::Running);
        s.fibers[cur].state = FiberState::Blocked;
    });
    dispatch();
    with(|s| s.fibers[s.current].wake_reason)
}

/// Like [`suspend`], with a timer racing the caller's other wake permits.
pub(crate) fn suspend_timeout(timeout: Duration) -> WakeReason {
    with(|s| s.arm_timeout(timeout));
    suspend()
}

/// Reschedules the current fiber to the tail of the ready queue.
pub(crate) fn yield_now() {
    with(|s| {
        let cur = s.current;
        s.fibers[cur].state = FiberState::Ready;
        s.ready.push_back(cur);
    });
    dispatch();
}

enum NextStep {
    Run(usize),
    Poll(Option<Duration>),
    Deadlock,
}

/// The dispatch loop. Runs on the stack of the fiber that is giving up the
/// processor and returns when that fiber is scheduled again.
fn dispatch() {
    loop {
        let now = Instant::now();
        let step = with(|s| {
            s.fire_due_timers(now);
            while let Some(index) = s.ready.pop_front() {
                if s.fibers[index].state == FiberState::Ready {
                    return NextStep::Run(index);
                }
            }
            if let Some(deadline) = s.next_timer_deadline() {
                NextStep::Poll(Some(deadline.saturating_duration_since(now)))
            } else if s.outstanding > 0 {
                NextStep::Poll(None)
            } else {
                NextStep::Deadlock
            }
        });
        match step {
            NextStep::Run(index) => {
                switch_to(index);
                return;
            }
            NextStep::Poll(timeout) => poll_step(timeout),
            NextStep::Deadlock => panic!(
                "deadlock: every fiber is blocked and no timer, I/O completion \
                 or worker result can wake any of them"
            ),
        }
    }
}

/// One blocking round on the completion port, delivering whatever wakeups it
/// produced. Also used by the runtime shutdown drain, where the main fiber
/// acts as the dispatcher without suspending itself.
pub(crate) fn poll_step(timeout: Option<Duration>) {
    let wakes = with(|s| s.port.poll(timeout));
    with(|s| {
        for w in wakes {
            s.wake(w, WakeReason::Signal);
        }
    });
}

pub(crate) fn fire_timers_now() {
    let now = Instant::now();
    with(|s| s.fire_due_timers(now));
}

fn switch_to(next: usize) {
    let ptrs = with(|s| {
        let prev = s.current;
        s.fibers[next].state = FiberState::Running;
        if next == prev {
            return None;
        }
        s.current = next;
        let save = &*s.fibers[prev].ctx as *const Context;
        let load = &*s.fibers[next].ctx as *const Context;
        Some((save, load))
    });
    if let Some((save, load)) = ptrs {
        unsafe { context::switch(save, load) }
    }
}

/// Entry trampoline of every non-main fiber. The `extern "C"` boundary turns
/// a panicking fiber into a process abort, which is the crate's failure
/// model: there is no exception surface across the scheduler.
extern "C" fn fiber_main() -> ! {
    let pooled = with(|s| matches!(s.fibers[s.current].kind, FiberKind::Pooled));
    if pooled {
        loop {
            let task = with(|s| {
                let cur = s.current;
                s.fibers[cur].task.take()
            });
            if let Some(task) = task {
                task();
            }
            let reason = {
                with(|s| s.pool_park());
                suspend()
            };
            if reason == WakeReason::Shutdown {
                break;
            }
        }
    } else {
        let task = with(|s| {
            let cur = s.current;
            s.fibers[cur].task.take()
        });
        if let Some(task) = task {
            task();
        }
    }

    with(|s| {
        let cur = s.current;
        s.fibers[cur].state = FiberState::Finished;
        s.live_fibers -= 1;
        if let Some(j) = s.fibers[cur].joiner.take() {
            s.wake(j, WakeReason::Signal);
        }
    });
    dispatch();
    unreachable!("a finished fiber was scheduled again");
}
