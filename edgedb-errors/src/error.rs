use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;

use crate::kinds::{error_name, tag_check};
use crate::traits::ErrorKind;

/// Error object returned by any client method.
#[derive(Debug)]
pub struct Error(pub(crate) Box<Inner>);

/// Tag that describes how an error should be handled.
///
/// Tags are checked rather than error kinds when deciding whether an
/// operation may be transparently retried or a connection re-established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub(crate) bit: u32,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub code: u32,
    pub messages: Vec<Cow<'static, str>>,
    pub error: Option<Box<dyn StdError + Send + Sync + 'static>>,
    pub headers: HashMap<u16, Bytes>,
}

impl Error {
    /// Checks whether this error is of the specified kind or a subclass
    /// of it.
    pub fn is<T: ErrorKind>(&self) -> bool {
        T::is_superclass_of(self.0.code)
    }
    /// Checks whether the error carries the behavioral tag.
    pub fn has_tag(&self, tag: Tag) -> bool {
        tag_check(self.0.code, tag.bit)
    }
    /// Adds a message to the chain of context messages.
    pub fn context<S: Into<Cow<'static, str>>>(mut self, msg: S) -> Error {
        self.0.messages.push(msg.into());
        self
    }
    /// Narrows the error to a more specific kind, keeping messages and
    /// source intact.
    pub fn refine_kind<T: ErrorKind>(mut self) -> Error {
        self.0.code = T::CODE;
        self
    }
    /// The name of the most specific class this error code maps to.
    pub fn kind_name(&self) -> &'static str {
        error_name(self.0.code)
    }
    /// The 32-bit error code.
    pub fn code(&self) -> u32 {
        self.0.code
    }
    /// The message the error was originally created with, if any.
    pub fn initial_message(&self) -> Option<&str> {
        self.0.messages.first().map(|m| &m[..])
    }
    /// Headers attached to the server's `ErrorResponse`.
    pub fn headers(&self) -> &HashMap<u16, Bytes> {
        &self.0.headers
    }
    pub fn with_headers(mut self, headers: HashMap<u16, Bytes>) -> Error {
        self.0.headers = headers;
        self
    }
    /// Constructs an error directly from a wire code and message, e.g.
    /// when decoding a server `ErrorResponse`.
    pub fn from_code_and_message(code: u32, message: impl Into<Cow<'static, str>>) -> Error {
        Error(Box::new(Inner {
            code,
            messages: vec![message.into()],
            error: None,
            headers: HashMap::new(),
        }))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind_name())?;
        for msg in self.0.messages.iter().rev() {
            write!(f, ": {msg}")?;
        }
        if let Some(src) = &self.0.error {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0
            .error
            .as_ref()
            .map(|b| b.as_ref() as &(dyn StdError + 'static))
    }
}
