//! Low-level connection handling.
//!
//! [Connection] speaks the wire protocol over any byte stream and is
//! normally managed by the pooled [Client](crate::Client); it is public
//! for programs that need to drive a single connection directly.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use edgedb_protocol::value::Value;

mod connection;
mod dump;
mod queries;

pub use connection::Connection;
pub use dump::{DUMP_MAGIC, DUMP_VERSION};
pub(crate) use connection::connect_stream;

/// Byte stream the protocol runs over: normally TLS over TCP, but any
/// duplex stream (e.g. an in-memory pipe in tests) works.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> AsyncIo for T {}

pub(crate) type Stream = Box<dyn AsyncIo>;

/// Named query arguments.
pub type Arguments = HashMap<String, Value>;

/// Called once when a connection's read loop terminates, however it
/// terminates. The pool uses this to drop the connection from its
/// table without holding a reference cycle.
pub(crate) type DisconnectHook = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

#[derive(Debug)]
pub(crate) enum Mode {
    /// Between requests.
    Normal {
        #[allow(dead_code)]
        idle_since: Instant,
    },
    /// A request pipeline is in flight or was abandoned mid-way.
    Dirty,
    Closed,
}

/// Settings the server reported in `ParameterStatus` messages.
#[derive(Debug, Default)]
pub(crate) struct ServerParams {
    pub raw: HashMap<String, Bytes>,
    pub suggested_pool_concurrency: Option<usize>,
    pub system_config: Option<Value>,
}
