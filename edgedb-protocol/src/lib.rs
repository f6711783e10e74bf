//! Wire protocol implementation for the EdgeDB database.
//!
//! This crate contains the message framing, the type descriptor parser
//! and the codec tree that together let a client speak the server's
//! binary protocol. Most applications should use the `edgedb-tokio`
//! client crate instead and treat this one as an implementation detail.
//!
//! The layers, bottom to top:
//!
//! * [encoding] — big-endian primitives and the [Encode](encoding::Encode)
//!   / [Decode](encoding::Decode) traits;
//! * [client_message] / [server_message] — one struct per protocol
//!   message;
//! * [descriptors] — the server's description of a query's input and
//!   output types;
//! * [codec] — turns descriptors into value encoders/decoders, cached
//!   in a [CodecRegistry](codec::CodecRegistry);
//! * [value] and [model] — what decoded data looks like.

pub mod client_message;
pub mod codec;
pub mod common;
pub mod descriptors;
pub mod encoding;
pub mod errors;
pub mod features;
pub mod model;
pub mod query_result;
pub mod server_message;
pub mod value;

pub use query_result::QueryResult;
