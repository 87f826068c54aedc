//! Client side of the RPC framework.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::net::TcpStream;
use crate::rpc::{Interface, RpcData, Value};

/// Performs one remote call over `stream`: writes the method id and the
/// request parameters, then reads the response parameters into `data`.
/// Succeeds iff every write and read completed.
///
/// The caller owns `data` and its parameter storage across the call; the
/// response values are available through it afterwards.
pub fn invoke_remote_call(data: &mut RpcData, stream: &mut (impl Read + Write)) -> Result<()> {
    let mut request = vec![data.method_id()];
    data.write_request(&mut request)
        .expect("writing to a Vec cannot fail");
    stream.write_all(&request)?;
    stream.flush()?;
    data.read_response(stream)?;
    Ok(())
}

/// A connected RPC client: a stream paired with the interface it speaks.
pub struct Client<C> {
    stream: TcpStream,
    interface: Rc<Interface<C>>,
}

impl<C> Client<C> {
    /// Connects to an RPC server at `addr`.
    pub fn connect(addr: &SocketAddr, interface: Rc<Interface<C>>) -> Result<Client<C>> {
        let stream = TcpStream::connect(addr)?;
        Ok(Client { stream, interface })
    }

    /// Calls `method_id` with the given request parameter values and returns
    /// the response parameter values.
    pub fn call(&mut self, method_id: u8, request: Vec<Value>) -> Result<Vec<Value>> {
        let mut data = self
            .interface
            .create_data(method_id)
            .ok_or(Error::UnknownMethod(method_id))?;
        for (index, value) in request.into_iter().enumerate() {
            data.set_request_param(index, value);
        }
        invoke_remote_call(&mut data, &mut self.stream)?;
        Ok(data.into_response())
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
