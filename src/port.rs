//! The completion port: the bridge between the scheduler and everything that
//! happens outside of it.
//!
//! The port multiplexes two completion sources onto the scheduler thread:
//! readiness of registered I/O handles (delivered by the OS poller) and user
//! completions posted by foreign threads (the worker pool). The scheduler is
//! the port's only dispatcher: it calls [`CompletionPort::poll`] whenever the
//! ready queue runs dry. Foreign threads interact with the port exclusively
//! through [`PostHandle::post`], which enqueues a completion and wakes the
//! poller.
//!
//! Every pending operation is identified by an overlap token. At most one
//! fiber is registered per token, and each completion is delivered to exactly
//! one fiber; a completion whose token has no registration is discarded — the
//! operation was cancelled.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::fiber::WakeRef;

const WAKER: Token = Token(0);

pub(crate) struct CompletionPort {
    poll: Poll,
    events: Events,
    posted: Arc<Mutex<Vec<WakeRef>>>,
    waker: Arc<Waker>,
    overlaps: HashMap<Token, WakeRef>,
    next_token: usize,
}

impl CompletionPort {
    pub fn new() -> io::Result<CompletionPort> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(CompletionPort {
            poll,
            events: Events::with_capacity(256),
            posted: Arc::new(Mutex::new(Vec::new())),
            waker,
            overlaps: HashMap::new(),
            next_token: WAKER.0,
        })
    }

    /// Allocates a fresh overlap token, used as the identity of one I/O
    /// handle for the lifetime of its wrapper.
    pub fn alloc_token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }

    pub fn register(
        &self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn reregister(
        &self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister(&self, source: &mut impl Source) {
        let _ = self.poll.registry().deregister(source);
    }

    /// Records `w` as the sole waiter for completions on `token`.
    pub fn register_overlap(&mut self, token: Token, w: WakeRef) {
        let prev = self.overlaps.insert(token, w);
        debug_assert!(prev.is_none(), "overlap registered twice");
    }

    pub fn deregister_overlap(&mut self, token: Token) {
        self.overlaps.remove(&token);
    }

    /// Removes and returns the waiter registered for `token`, if any. The
    /// caller wakes it with an error: the operation was cancelled underneath
    /// it (its stream was shut down or its listener closed).
    pub fn cancel(&mut self, token: Token) -> Option<WakeRef> {
        self.overlaps.remove(&token)
    }

    /// A thread-safe handle through which worker threads post completions.
    pub fn post_handle(&self) -> PostHandle {
        PostHandle {
            posted: Arc::clone(&self.posted),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Waits up to `timeout` for the next batch of completions and returns
    /// the wake permits to deliver. Called from the scheduler thread only.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Vec<WakeRef> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Vec::new(),
            Err(e) => panic!("completion port poll failed: {}", e),
        }
        let mut wakes = Vec::new();
        for event in self.events.iter() {
            if event.token() == WAKER {
                continue;
            }
            if let Some(w) = self.overlaps.remove(&event.token()) {
                wakes.push(w);
            }
        }
        let mut posted = self.posted.lock().expect("completion queue poisoned");
        wakes.append(&mut posted);
        wakes
    }
}

/// The single object in the crate that crosses threads. Cloned into every
/// worker job so that job completion can reach the scheduler.
#[derive(Clone)]
pub(crate) struct PostHandle {
    posted: Arc<Mutex<Vec<WakeRef>>>,
    waker: Arc<Waker>,
}

impl PostHandle {
    pub fn post(&self, w: WakeRef) {
        self.posted
            .lock()
            .expect("completion queue poisoned")
            .push(w);
        let _ = self.waker.wake();
    }
}
