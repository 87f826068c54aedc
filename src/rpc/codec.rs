//! Wire encoding of RPC parameter values.
//!
//! All integers travel as fixed-width little-endian (two's complement for the
//! signed kinds); strings and blobs as a `u32` byte length followed by the
//! raw bytes (UTF-8 for strings). There is no frame-level length prefix:
//! every reader consumes exactly the bytes its parameter occupies, so a short
//! read or an invalid length is indistinguishable from a disconnect and
//! terminates the connection.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Upper bound on a string/blob length prefix. Anything larger is treated as
/// a malformed frame rather than an allocation request.
pub const MAX_LENGTH_PREFIX: u32 = 64 << 20;

/// The closed set of wire types an RPC parameter can have.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WireType {
    U32,
    U64,
    I32,
    I64,
    Str,
    Blob,
}

/// A single RPC parameter value, tagged with its wire type.
///
/// This is the crate's rendition of the per-parameter operation set
/// {construct, destroy, read, write, get, set, hash}: construction is
/// [`Value::zero`], destruction is `Drop`, and the rest dispatch over the
/// closed variant set. New wire types are added here, not registered at
/// runtime.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    /// The default-constructed value of `ty`, used as parameter storage
    /// before a read or a set.
    pub fn zero(ty: WireType) -> Value {
        match ty {
            WireType::U32 => Value::U32(0),
            WireType::U64 => Value::U64(0),
            WireType::I32 => Value::I32(0),
            WireType::I64 => Value::I64(0),
            WireType::Str => Value::Str(String::new()),
            WireType::Blob => Value::Blob(Vec::new()),
        }
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            Value::U32(_) => WireType::U32,
            Value::U64(_) => WireType::U64,
            Value::I32(_) => WireType::I32,
            Value::I64(_) => WireType::I64,
            Value::Str(_) => WireType::Str,
            Value::Blob(_) => WireType::Blob,
        }
    }

    /// Reads one value of type `ty` from the stream, consuming exactly the
    /// bytes that value occupies.
    pub fn read(ty: WireType, r: &mut impl Read) -> io::Result<Value> {
        Ok(match ty {
            WireType::U32 => Value::U32(r.read_u32::<LittleEndian>()?),
            WireType::U64 => Value::U64(r.read_u64::<LittleEndian>()?),
            WireType::I32 => Value::I32(r.read_i32::<LittleEndian>()?),
            WireType::I64 => Value::I64(r.read_i64::<LittleEndian>()?),
            WireType::Str => {
                let bytes = read_length_prefixed(r)?;
                let s = String::from_utf8(bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("invalid utf-8: {}", e))
                })?;
                Value::Str(s)
            }
            WireType::Blob => Value::Blob(read_length_prefixed(r)?),
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        match self {
            Value::U32(v) => w.write_u32::<LittleEndian>(*v),
            Value::U64(v) => w.write_u64::<LittleEndian>(*v),
            Value::I32(v) => w.write_i32::<LittleEndian>(*v),
            Value::I64(v) => w.write_i64::<LittleEndian>(*v),
            Value::Str(s) => write_length_prefixed(w, s.as_bytes()),
            Value::Blob(b) => write_length_prefixed(w, b),
        }
    }

    /// Folds this value into a running hash. The result depends on the value
    /// bytes and on `start`, so folding a parameter list is order-sensitive.
    pub fn hash(&self, start: u32) -> u32 {
        match self {
            Value::U32(v) => hash_bytes(start, &v.to_le_bytes()),
            Value::U64(v) => hash_bytes(start, &v.to_le_bytes()),
            Value::I32(v) => hash_bytes(start, &v.to_le_bytes()),
            Value::I64(v) => hash_bytes(start, &v.to_le_bytes()),
            Value::Str(s) => hash_prefixed(start, s.as_bytes()),
            Value::Blob(b) => hash_prefixed(start, b),
        }
    }

    /// Typed accessors. Asking for the wrong type is a precondition
    /// violation, exactly like indexing a parameter that does not exist.
    pub fn as_u32(&self) -> u32 {
        match self {
            Value::U32(v) => *v,
            other => panic!("expected a u32 parameter, got {:?}", other.wire_type()),
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Value::U64(v) => *v,
            other => panic!("expected a u64 parameter, got {:?}", other.wire_type()),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::I32(v) => *v,
            other => panic!("expected an i32 parameter, got {:?}", other.wire_type()),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::I64(v) => *v,
            other => panic!("expected an i64 parameter, got {:?}", other.wire_type()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(s) => s,
            other => panic!("expected a string parameter, got {:?}", other.wire_type()),
        }
    }

    pub fn as_blob(&self) -> &[u8] {
        match self {
            Value::Blob(b) => b,
            other => panic!("expected a blob parameter, got {:?}", other.wire_type()),
        }
    }
}

fn read_length_prefixed(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()?;
    if len > MAX_LENGTH_PREFIX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("length prefix {} exceeds the frame limit", len),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_length_prefixed(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    debug_assert!(bytes.len() <= MAX_LENGTH_PREFIX as usize);
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn hash_prefixed(start: u32, bytes: &[u8]) -> u32 {
    let h = hash_bytes(start, &(bytes.len() as u32).to_le_bytes());
    hash_bytes(h, bytes)
}

/// FNV-1a folded over `bytes`, seeded with the running value.
fn hash_bytes(start: u32, bytes: &[u8]) -> u32 {
    let mut h = start ^ 0x811c_9dc5;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(16_777_619);
    }
    h
}
