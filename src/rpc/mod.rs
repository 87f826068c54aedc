//! The RPC framework: method tables, wire framing, server-side dispatch and
//! client-side calls.
//!
//! An [`Interface`] is an ordered table of [`Method`]s indexed by a
//! single-octet method id. Each method describes its request and response
//! parameters as [`Param`]s over the closed set of wire types and carries the
//! server-side callback. An [`RpcData`] is one live invocation: the
//! constructed request and response parameter values of a single
//! request/response pair, created per inbound request on the server and per
//! outbound call on the client.
//!
//! Wire framing per request/response pair:
//!
//! ```text
//! request  := u8 method_id  PARAMS(method.request)
//! response := PARAMS(method.response)
//! ```
//!
//! There is no frame-level length; each parameter reader consumes exactly the
//! bytes its parameter occupies (see [`codec`]).

pub mod client;
pub mod codec;
pub mod server;

use std::io::{Read, Write};
use std::rc::Rc;

pub use client::{invoke_remote_call, Client};
pub use codec::{Value, WireType};
pub use server::{Server, ServerParams};

/// One parameter descriptor: a wire type plus the "is-key" flag that opts the
/// parameter into [`RpcData::request_hash`].
#[derive(Clone, Copy, Debug)]
pub struct Param {
    pub ty: WireType,
    pub is_key: bool,
}

impl Param {
    pub fn new(ty: WireType) -> Param {
        Param { ty, is_key: false }
    }

    /// A parameter that participates in the request hash.
    pub fn key(ty: WireType) -> Param {
        Param { ty, is_key: true }
    }
}

struct MethodSpec {
    request: Vec<Param>,
    response: Vec<Param>,
}

/// A single RPC method: request/response parameter descriptors and the
/// server-side callback.
pub struct Method<C> {
    spec: Rc<MethodSpec>,
    callback: Box<dyn Fn(&mut RpcData, &C)>,
}

impl<C> Method<C> {
    pub fn new(
        request: Vec<Param>,
        response: Vec<Param>,
        callback: impl Fn(&mut RpcData, &C) + 'static,
    ) -> Method<C> {
        Method {
            spec: Rc::new(MethodSpec { request, response }),
            callback: Box::new(callback),
        }
    }

    pub(crate) fn invoke(&self, data: &mut RpcData, ctx: &C) {
        (self.callback)(data, ctx);
    }
}

/// An ordered method table indexed by a single-octet method id.
pub struct Interface<C> {
    methods: Vec<Method<C>>,
}

impl<C> Interface<C> {
    /// At most 256 methods fit the one-octet id space.
    pub fn new(methods: Vec<Method<C>>) -> Interface<C> {
        assert!(
            methods.len() <= 256,
            "an interface holds at most 256 methods"
        );
        Interface { methods }
    }

    pub fn method(&self, method_id: u8) -> Option<&Method<C>> {
        self.methods.get(method_id as usize)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Constructs the parameter storage for one invocation of
    /// `method_id`. `None` for an id with no method.
    pub fn create_data(&self, method_id: u8) -> Option<RpcData> {
        let method = self.method(method_id)?;
        Some(RpcData::new(method_id, Rc::clone(&method.spec)))
    }
}

/// A live request/response invocation: the method id plus constructed
/// request and response parameter values. The data exclusively owns its
/// parameter storage; everything is released on drop.
pub struct RpcData {
    method_id: u8,
    spec: Rc<MethodSpec>,
    request: Vec<Value>,
    response: Vec<Value>,
}

impl RpcData {
    fn new(method_id: u8, spec: Rc<MethodSpec>) -> RpcData {
        let request = spec.request.iter().map(|p| Value::zero(p.ty)).collect();
        let response = spec.response.iter().map(|p| Value::zero(p.ty)).collect();
        RpcData {
            method_id,
            spec,
            request,
            response,
        }
    }

    pub fn method_id(&self) -> u8 {
        self.method_id
    }

    pub fn request_param(&self, index: usize) -> &Value {
        &self.request[index]
    }

    pub fn response_param(&self, index: usize) -> &Value {
        &self.response[index]
    }

    /// Stores a request parameter value. The value must match the declared
    /// wire type; a mismatch is a precondition violation.
    pub fn set_request_param(&mut self, index: usize, value: Value) {
        let expected = self.spec.request[index].ty;
        assert!(
            value.wire_type() == expected,
            "request parameter {} expects {:?}, got {:?}",
            index,
            expected,
            value.wire_type()
        );
        self.request[index] = value;
    }

    /// Stores a response parameter value, with the same type contract as
    /// [`set_request_param`](Self::set_request_param).
    pub fn set_response_param(&mut self, index: usize, value: Value) {
        let expected = self.spec.response[index].ty;
        assert!(
            value.wire_type() == expected,
            "response parameter {} expects {:?}, got {:?}",
            index,
            expected,
            value.wire_type()
        );
        self.response[index] = value;
    }

    /// Folds the is-key request parameters into a hash, starting from
    /// `start`. The result depends only on `start`, the method descriptors
    /// and the key parameter values, in declaration order.
    pub fn request_hash(&self, start: u32) -> u32 {
        let mut h = start;
        for (param, value) in self.spec.request.iter().zip(&self.request) {
            if param.is_key {
                h = value.hash(h);
            }
        }
        h
    }

    /// Consumes the invocation, yielding the response values.
    pub fn into_response(self) -> Vec<Value> {
        self.response
    }

    pub(crate) fn read_request(&mut self, r: &mut impl Read) -> std::io::Result<()> {
        for (i, param) in self.spec.request.iter().enumerate() {
            self.request[i] = Value::read(param.ty, r)?;
        }
        Ok(())
    }

    pub(crate) fn write_request(&self, w: &mut impl Write) -> std::io::Result<()> {
        for value in &self.request {
            value.write(w)?;
        }
        Ok(())
    }

    pub(crate) fn read_response(&mut self, r: &mut impl Read) -> std::io::Result<()> {
        for (i, param) in self.spec.response.iter().enumerate() {
            self.response[i] = Value::read(param.ty, r)?;
        }
        Ok(())
    }

    pub(crate) fn write_response(&self, w: &mut impl Write) -> std::io::Result<()> {
        for value in &self.response {
            value.write(w)?;
        }
        Ok(())
    }
}
