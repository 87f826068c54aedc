//! Fiber-aware TCP: blocking-style sockets that never block the thread.
//!
//! [`TcpStream`] and [`TcpListener`] wrap non-blocking sockets. Every
//! operation first tries the non-blocking call; on `WouldBlock` the fiber
//! registers its interest and an overlap with the completion port and
//! suspends until readiness is delivered, then retries. To the calling fiber
//! the call looks blocking; the runtime thread keeps scheduling other fibers
//! in the meantime.
//!
//! Shutting a socket down while another fiber has an operation in flight
//! cancels that operation: the waiter wakes with an error and the connection
//! is torn down, which is also how pending I/O is interrupted at server
//! shutdown.

use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use mio::{Interest, Token};

use crate::error::{Error, Result};
use crate::fiber::{self, sched, WakeReason};
use crate::worker;

/// Fiber-friendly name resolution: the blocking lookup runs on the worker
/// thread pool while the calling fiber is suspended.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs = worker::execute(|| (host, port).to_socket_addrs().map(|it| it.collect()))?;
    Ok(addrs)
}

////////////////////////////////////////////////////////////////////////////////
// TcpStream
////////////////////////////////////////////////////////////////////////////////

/// A TCP connection whose reads, writes and connect appear blocking from a
/// fiber.
pub struct TcpStream {
    inner: RefCell<mio::net::TcpStream>,
    token: Token,
    registered: Cell<Option<Interest>>,
}

impl TcpStream {
    fn wrap(inner: mio::net::TcpStream) -> TcpStream {
        TcpStream {
            inner: RefCell::new(inner),
            token: sched::with(|s| s.port.alloc_token()),
            registered: Cell::new(None),
        }
    }

    /// Opens a TCP connection to `addr`.
    pub fn connect(addr: &SocketAddr) -> Result<TcpStream> {
        let stream = TcpStream::wrap(mio::net::TcpStream::connect(*addr)?);
        loop {
            stream.wait_io(Interest::WRITABLE, None)?;
            if let Some(e) = stream.inner.borrow().take_error()? {
                return Err(e.into());
            }
            let result = stream.inner.borrow().peer_addr().map(|_| ());
            match result {
                Ok(()) => return Ok(stream),
                Err(ref e)
                    if e.kind() == io::ErrorKind::NotConnected
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolves `host` (offloaded to the worker pool) and connects to the
    /// first address that accepts.
    pub fn connect_host(host: &str, port: u16) -> Result<TcpStream> {
        let addrs = resolve(host, port)?;
        let mut last = Error::Io(io::ErrorKind::AddrNotAvailable.into());
        for addr in &addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.borrow().peer_addr()?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.borrow().local_addr()?)
    }

    /// Pulls some bytes from the connection; `Ok(0)` is end of stream.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.borrow_mut().read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            self.wait_io(Interest::READABLE, None).map_err(to_io)?;
        }
    }

    /// Like [`recv`](Self::recv) with a deadline; [`Error::Timeout`] on
    /// expiry.
    pub fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        loop {
            match self.inner.borrow_mut().read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            self.wait_io(Interest::READABLE, Some(timeout))?;
        }
    }

    /// Pushes some bytes into the connection.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.inner.borrow_mut().write(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            self.wait_io(Interest::WRITABLE, None).map_err(to_io)?;
        }
    }

    /// Like [`send`](Self::send) with a deadline; [`Error::Timeout`] on
    /// expiry.
    pub fn send_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        loop {
            match self.inner.borrow_mut().write(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            self.wait_io(Interest::WRITABLE, Some(timeout))?;
        }
    }

    /// Shuts the connection down in both directions and cancels any
    /// operation another fiber has pending on it (the waiter completes with
    /// an error).
    pub fn shutdown(&self) {
        let _ = self.inner.borrow().shutdown(Shutdown::Both);
        cancel_waiter(self.token);
    }

    /// Suspends the current fiber until the socket is ready for `interest`.
    fn wait_io(&self, interest: Interest, timeout: Option<Duration>) -> Result<()> {
        sched::with(|s| -> io::Result<()> {
            let mut inner = self.inner.borrow_mut();
            match self.registered.get() {
                None => s.port.register(&mut *inner, self.token, interest)?,
                Some(prev) if prev != interest => {
                    s.port.reregister(&mut *inner, self.token, interest)?
                }
                Some(_) => {}
            }
            self.registered.set(Some(interest));
            let w = s.wait_ref();
            s.port.register_overlap(self.token, w);
            s.adjust_outstanding(1);
            Ok(())
        })?;
        let reason = match timeout {
            None => fiber::suspend(),
            Some(t) => fiber::suspend_timeout(t),
        };
        sched::with(|s| {
            s.port.deregister_overlap(self.token);
            s.adjust_outstanding(-1);
        });
        match reason {
            WakeReason::Signal => Ok(()),
            WakeReason::Timeout => Err(Error::Timeout),
            WakeReason::Cancelled => Err(Error::Closed),
            WakeReason::Shutdown => unreachable!("io wait woken by runtime shutdown"),
        }
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        sched::try_with(|s| {
            s.port.deregister(&mut *self.inner.borrow_mut());
        });
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}

impl Read for &TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpStream")
            .field("token", &self.token.0)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// TcpListener
////////////////////////////////////////////////////////////////////////////////

/// A TCP listener whose [`accept`](Self::accept) appears blocking from a
/// fiber.
pub struct TcpListener {
    inner: RefCell<mio::net::TcpListener>,
    token: Token,
    registered: Cell<bool>,
    closed: Cell<bool>,
}

impl TcpListener {
    pub fn bind(addr: &SocketAddr) -> Result<TcpListener> {
        let inner = mio::net::TcpListener::bind(*addr)?;
        Ok(TcpListener {
            inner: RefCell::new(inner),
            token: sched::with(|s| s.port.alloc_token()),
            registered: Cell::new(false),
            closed: Cell::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.borrow().local_addr()?)
    }

    /// Accepts the next incoming connection, suspending the current fiber
    /// until one arrives. Fails with [`Error::Closed`] once
    /// [`close`](Self::close) has been called.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        loop {
            if self.closed.get() {
                return Err(Error::Closed);
            }
            match self.inner.borrow().accept() {
                Ok((stream, peer)) => return Ok((TcpStream::wrap(stream), peer)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            self.wait_readable()?;
        }
    }

    /// Stops the listener: a pending or future [`accept`](Self::accept)
    /// fails with [`Error::Closed`].
    pub fn close(&self) {
        self.closed.set(true);
        cancel_waiter(self.token);
    }

    fn wait_readable(&self) -> Result<()> {
        sched::with(|s| -> io::Result<()> {
            let mut inner = self.inner.borrow_mut();
            if !self.registered.get() {
                s.port
                    .register(&mut *inner, self.token, Interest::READABLE)?;
                self.registered.set(true);
            }
            let w = s.wait_ref();
            s.port.register_overlap(self.token, w);
            s.adjust_outstanding(1);
            Ok(())
        })?;
        let reason = fiber::suspend();
        sched::with(|s| {
            s.port.deregister_overlap(self.token);
            s.adjust_outstanding(-1);
        });
        match reason {
            WakeReason::Signal => Ok(()),
            WakeReason::Cancelled => Err(Error::Closed),
            reason => unreachable!("unexpected wake reason {:?} on accept", reason),
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        sched::try_with(|s| {
            s.port.deregister(&mut *self.inner.borrow_mut());
        });
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("token", &self.token.0)
            .finish_non_exhaustive()
    }
}

fn cancel_waiter(token: Token) {
    sched::with(|s| {
        if let Some(w) = s.port.cancel(token) {
            s.wake(w, WakeReason::Cancelled);
        }
    });
}

fn to_io(e: Error) -> io::Error {
    match e {
        Error::Io(e) => e,
        Error::Closed => io::Error::new(io::ErrorKind::ConnectionAborted, "stream shut down"),
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
