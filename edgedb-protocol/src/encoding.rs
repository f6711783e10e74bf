/*!
Primitives for reading and writing the binary protocol: the [Input] and
[Output] buffers and the [Decode]/[Encode] traits implemented by every
message and codec in this crate.

Everything on the wire is big-endian. Strings and byte strings carry a
`u32` length prefix; UUIDs are 16 bytes in network order.
*/

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::Uuid;

use crate::errors::{self, DecodeError, EncodeError};
use crate::features::ProtocolVersion;

/// Message headers: numeric key to value bytes.
pub type KeyValues = HashMap<u16, Bytes>;

/// An input buffer positioned somewhere in a message frame.
pub struct Input {
    proto: ProtocolVersion,
    bytes: Bytes,
}

/// An output buffer for a message frame being built.
pub struct Output<'a> {
    proto: &'a ProtocolVersion,
    buf: &'a mut BytesMut,
}

pub trait Encode {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError>;
}

pub trait Decode: Sized {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError>;
}

impl Input {
    pub fn new(proto: ProtocolVersion, bytes: Bytes) -> Input {
        Input { proto, bytes }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    /// Splits off the next `len` bytes as a nested input buffer.
    pub fn slice_to(&mut self, len: usize) -> Input {
        Input {
            proto: self.proto.clone(),
            bytes: self.bytes.split_to(len),
        }
    }
}

impl Deref for Input {
    type Target = Bytes;
    fn deref(&self) -> &Bytes {
        &self.bytes
    }
}

impl DerefMut for Input {
    fn deref_mut(&mut self) -> &mut Bytes {
        &mut self.bytes
    }
}

impl<'a> Output<'a> {
    pub fn new(proto: &'a ProtocolVersion, buf: &'a mut BytesMut) -> Output<'a> {
        Output { proto, buf }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        self.proto
    }
}

impl Deref for Output<'_> {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf
    }
}

impl DerefMut for Output<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf
    }
}

/// Writes one framed message: type tag, then a `u32` length covering
/// the length field itself and the payload (but not the tag).
pub fn encode<T: Encode>(buf: &mut Output, mtype: u8, msg: &T) -> Result<(), EncodeError> {
    buf.reserve(5);
    buf.put_u8(mtype);
    let pos = buf.len();
    buf.put_u32(0); // length, backfilled below
    msg.encode(buf)?;
    let len = u32::try_from(buf.len() - pos)
        .ok()
        .context(errors::MessageTooLong)?;
    buf[pos..pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

pub(crate) fn ensure_exact(buf: &Input, len: usize) -> Result<(), DecodeError> {
    ensure!(buf.remaining() >= len, errors::Underflow);
    ensure!(buf.remaining() <= len, errors::ExtraData);
    Ok(())
}

pub(crate) fn decode_kv(buf: &mut Input) -> Result<KeyValues, DecodeError> {
    ensure!(buf.remaining() >= 2, errors::Underflow);
    let count = buf.get_u16();
    let mut headers = HashMap::new();
    for _ in 0..count {
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let code = buf.get_u16();
        headers.insert(code, Bytes::decode(buf)?);
    }
    Ok(headers)
}

pub(crate) fn encode_kv(buf: &mut Output, headers: &KeyValues) -> Result<(), EncodeError> {
    buf.reserve(2);
    buf.put_u16(
        u16::try_from(headers.len())
            .ok()
            .context(errors::TooManyHeaders)?,
    );
    for (&code, value) in headers {
        buf.reserve(2);
        buf.put_u16(code);
        value.encode(buf)?;
    }
    Ok(())
}

impl Encode for String {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.as_str().encode(buf)
    }
}

impl Encode for &str {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len()).ok().context(errors::StringTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let data = Bytes::decode(buf)?;
        let text = std::str::from_utf8(&data).context(errors::InvalidUtf8)?;
        Ok(text.to_owned())
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len()).ok().context(errors::StringTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Decode for Bytes {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_u32() as usize;
        ensure!(buf.remaining() >= len, errors::Underflow);
        Ok(buf.copy_to_bytes(len))
    }
}

impl Encode for Uuid {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(16);
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for Uuid {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 16, errors::Underflow);
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }
}
