use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;

use crate::error::{Error, Inner};

pub trait Sealed {
    const CODE: u32;
    const NAME: &'static str;
    const TAGS: u32;

    /// Whether `code` is this kind or one of its subclasses.
    ///
    /// Codes form a four-level hierarchy: each byte of the code narrows the
    /// class, and a zero suffix means "whole class". `0x04000000` is every
    /// query error, `0x04010000` every syntax error within it, and so on.
    fn is_superclass_of(code: u32) -> bool {
        let mask = match Self::CODE {
            c if c & 0x00FF_FFFF == 0 => 0xFF00_0000,
            c if c & 0x0000_FFFF == 0 => 0xFFFF_0000,
            c if c & 0x0000_00FF == 0 => 0xFFFF_FF00,
            _ => 0xFFFF_FFFF,
        };
        code & mask == Self::CODE
    }
}

/// Constructors for a specific kind of [`Error`].
pub trait ErrorKind: Sealed {
    fn build() -> Error {
        Error(Box::new(Inner {
            code: Self::CODE,
            messages: Vec::new(),
            error: None,
            headers: HashMap::new(),
        }))
    }
    fn with_message<S: Into<Cow<'static, str>>>(message: S) -> Error {
        Error(Box::new(Inner {
            code: Self::CODE,
            messages: vec![message.into()],
            error: None,
            headers: HashMap::new(),
        }))
    }
    fn with_source<E: StdError + Send + Sync + 'static>(source: E) -> Error {
        Error(Box::new(Inner {
            code: Self::CODE,
            messages: Vec::new(),
            error: Some(Box::new(source)),
            headers: HashMap::new(),
        }))
    }
}

/// Shortcut for attaching context messages to a `Result<_, Error>`.
pub trait ResultExt<T> {
    fn context<S: Into<Cow<'static, str>>>(self, msg: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<Cow<'static, str>>>(self, msg: S) -> Result<T, Error> {
        self.map_err(|e| e.context(msg))
    }
}
