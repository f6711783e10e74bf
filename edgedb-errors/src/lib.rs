//! Error handling for the EdgeDB client.
//!
//! All errors that the client surfaces are instances of [`Error`]. An error
//! carries a 32-bit code that places it in the server's error hierarchy, and
//! may be checked against a specific kind:
//!
//! ```rust
//! # use edgedb_errors::{Error, ErrorKind, UnexpectedMessageError, ProtocolError};
//! let err = UnexpectedMessageError::with_message("pong without ping");
//! assert!(err.is::<UnexpectedMessageError>());
//! assert!(err.is::<ProtocolError>());  // its superclass
//! ```
mod error;
mod traits;

pub mod kinds;

pub use error::{Error, Tag};
pub use kinds::*;
pub use traits::{ErrorKind, ResultExt};
