//! Server side of the RPC framework: the acceptor fiber and the connection
//! processor pool.

use std::cell::RefCell;
use std::io::{BufReader, Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::error::Result;
use crate::event::Event;
use crate::fiber::{self, Fiber};
use crate::net::{TcpListener, TcpStream};
use crate::pool::{Pool, PoolItem};
use crate::rpc::Interface;

/// Fixed size of the connection processor pool; an accept beyond it waits
/// until a processor frees up.
const CONNECTION_PROCESSORS_CNT: usize = 100;
const SERVER_FIBER_STACK_SIZE: usize = 0x10000;

/// Parameters for [`Server::new`].
pub struct ServerParams<C> {
    pub interface: Rc<Interface<C>>,
    pub service_ctx: Rc<C>,
    pub listen_addr: SocketAddr,
}

/// An RPC server: a listening socket, an acceptor fiber and a fixed pool of
/// connection processors.
///
/// Each accepted connection is handed to a processor, whose worker fiber
/// answers requests on that connection one at a time until the peer
/// disconnects or sends a malformed frame. Connection failures tear down
/// that one connection; the server stays available.
pub struct Server<C: 'static> {
    listener: Rc<TcpListener>,
    processors: Rc<Pool<Processor>>,
    acceptor: Fiber,
    _marker: std::marker::PhantomData<C>,
}

impl<C: 'static> Server<C> {
    /// Binds `listen_addr` and starts the acceptor fiber.
    pub fn new(params: ServerParams<C>) -> Result<Server<C>> {
        let ServerParams {
            interface,
            service_ctx,
            listen_addr,
        } = params;

        let listener = match TcpListener::bind(&listen_addr) {
            Ok(listener) => Rc::new(listener),
            Err(e) => {
                log::error!("cannot bind the rpc server to {}: {}", listen_addr, e);
                return Err(e);
            }
        };
        let processors = Rc::new(Pool::new(CONNECTION_PROCESSORS_CNT, Processor::new));

        let mut acceptor = {
            let listener = Rc::clone(&listener);
            let processors = Rc::clone(&processors);
            fiber::Builder::new()
                .name("rpc-server")
                .stack_size(SERVER_FIBER_STACK_SIZE)
                .proc(move || acceptor_loop(listener, processors, interface, service_ctx))
                .build()
        };
        acceptor.start();

        Ok(Server {
            listener,
            processors,
            acceptor,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Stops the server: closes the listener, disconnects every in-flight
    /// processor, joins the acceptor fiber and waits for the processors to
    /// drain before the pool is destroyed.
    pub fn shutdown(self) {
        self.listener.close();
        self.processors.for_each_entry(|p, is_acquired| {
            if is_acquired {
                p.stop();
            }
        });
        self.acceptor.join();
        // The acceptor may have handed its last connection to a processor
        // after the first sweep (it can park in pool.acquire with a stream in
        // hand), so sweep once more before waiting for the pool to drain.
        self.processors.for_each_entry(|p, is_acquired| {
            if is_acquired {
                p.stop();
            }
        });
        self.processors.for_each_entry(|p, _| p.wait_idle());
        log::debug!("rpc server stopped");
    }
}

fn acceptor_loop<C: 'static>(
    listener: Rc<TcpListener>,
    processors: Rc<Pool<Processor>>,
    interface: Rc<Interface<C>>,
    service_ctx: Rc<C>,
) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                log::debug!("rpc server stops accepting: {}", e);
                break;
            }
        };
        log::debug!("rpc connection accepted from {}", peer);
        let processor = processors.acquire();
        Processor::start(
            processor,
            Rc::clone(&processors),
            stream,
            Rc::clone(&interface),
            Rc::clone(&service_ctx),
        );
    }
}

////////////////////////////////////////////////////////////////////////////////
// Processor
////////////////////////////////////////////////////////////////////////////////

/// One connection processor: the (client stream, worker fiber) pair that
/// serially answers requests on a single connection.
struct Processor {
    stream: RefCell<Option<Rc<TcpStream>>>,
    idle: Event,
}

impl Processor {
    fn new() -> Processor {
        let idle = Event::manual();
        idle.set();
        Processor {
            stream: RefCell::new(None),
            idle,
        }
    }

    /// Hands `stream` to the processor's worker fiber and returns
    /// immediately; the processor releases itself back to the pool when the
    /// connection is over.
    fn start<C: 'static>(
        item: PoolItem<Processor>,
        pool: Rc<Pool<Processor>>,
        stream: TcpStream,
        interface: Rc<Interface<C>>,
        service_ctx: Rc<C>,
    ) {
        let stream = Rc::new(stream);
        item.idle.reset();
        *item.stream.borrow_mut() = Some(Rc::clone(&stream));

        fiber::execute_async(move || {
            serve_connection(&stream, &interface, &service_ctx);
            stream.shutdown();
            *item.stream.borrow_mut() = None;
            item.idle.set();
            pool.release(item);
        });
    }

    /// Disconnects the processor's stream, making its pending read complete
    /// with an error so the worker fiber winds down.
    fn stop(&self) {
        if let Some(stream) = &*self.stream.borrow() {
            stream.shutdown();
        }
    }

    fn wait_idle(&self) {
        self.idle.wait();
    }
}

fn serve_connection<C>(stream: &Rc<TcpStream>, interface: &Interface<C>, ctx: &C) {
    let mut reader = BufReader::new(&**stream);
    let mut writer = &**stream;
    while process_next_rpc(interface, ctx, &mut reader, &mut writer) {}
}

/// Answers a single request on the connection. Returns `false` when the
/// connection is over: end of stream, an unknown method id or a malformed
/// frame — all indistinguishable by design, and none of them reported to the
/// peer.
pub fn process_next_rpc<C>(
    interface: &Interface<C>,
    ctx: &C,
    r: &mut impl Read,
    w: &mut impl Write,
) -> bool {
    let mut method_id = [0u8; 1];
    if r.read_exact(&mut method_id).is_err() {
        return false;
    }
    let method_id = method_id[0];

    let method = match interface.method(method_id) {
        Some(method) => method,
        None => {
            log::warn!("rpc request with unknown method id {}", method_id);
            return false;
        }
    };
    let mut data = interface
        .create_data(method_id)
        .expect("the method was just looked up");

    if let Err(e) = data.read_request(r) {
        log::debug!("rpc request for method {} aborted: {}", method_id, e);
        return false;
    }
    method.invoke(&mut data, ctx);

    let mut response = Vec::new();
    data.write_response(&mut response)
        .expect("writing to a Vec cannot fail");
    if let Err(e) = w.write_all(&response).and_then(|_| w.flush()) {
        log::debug!("rpc response for method {} aborted: {}", method_id, e);
        return false;
    }
    true
}
