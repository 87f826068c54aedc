//! Error handling utils.
//!
//! Recoverable failures are always surfaced as explicit values: timeouts come
//! back as a `bool`/`Option`/`Err(Timeout)` discriminant from the
//! `_timeout` variants, I/O failures as [`Error::Io`]. There is no exception
//! surface: API misuse (a violated precondition) and resource exhaustion at
//! init panic with a diagnostic naming the broken invariant, and a panic
//! inside a fiber aborts the process.

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all recoverable error cases of the crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A `_timeout` operation exceeded its deadline. The awaited state is
    /// left unchanged.
    #[error("operation timed out")]
    Timeout,

    /// The stream or listener was shut down while an operation was pending
    /// on it.
    #[error("connection closed")]
    Closed,

    /// A method id with no entry in the interface table.
    #[error("unknown rpc method id {0}")]
    UnknownMethod(u8),
}

impl Error {
    /// Whether this error is the timeout discriminant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
