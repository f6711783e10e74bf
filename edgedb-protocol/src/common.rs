/*!
Shared wire-level enums and flags: [Capabilities], [Cardinality],
[IoFormat] and friends.
*/

use std::convert::TryFrom;

use bytes::Bytes;
use uuid::Uuid;

use crate::descriptors::Typedesc;
use crate::encoding::Input;
use crate::errors::{self, DecodeError};
use crate::features::ProtocolVersion;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        const MODIFICATIONS =       0b00000001;
        const SESSION_CONFIG =      0b00000010;
        const TRANSACTION =         0b00000100;
        const DDL =                 0b00001000;
        const PERSISTENT_CONFIG =   0b00010000;
        const ALL =                 0b00011111;
    }
}

/// Declared bound on a query's row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cardinality {
    NoResult = 0x6e,
    AtMostOne = 0x6f,
    One = 0x41,
    Many = 0x6d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoFormat {
    Binary = 0x62,
    Json = 0x6a,
    JsonElements = 0x4a,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DescribeAspect {
    DataDescription = 0x54,
}

/// Options forwarded to the server compiler as `Prepare` headers.
#[derive(Debug, Clone)]
pub struct CompilationOptions {
    pub implicit_limit: Option<u64>,
    pub implicit_typenames: bool,
    pub implicit_typeids: bool,
    pub explicit_objectids: bool,
    pub allow_capabilities: Capabilities,
    pub io_format: IoFormat,
    pub expected_cardinality: Cardinality,
}

/// A type descriptor blob as received from the server, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTypedesc {
    pub proto: ProtocolVersion,
    pub id: Uuid,
    pub data: Bytes,
}

impl RawTypedesc {
    pub fn uninitialized() -> RawTypedesc {
        RawTypedesc {
            proto: ProtocolVersion::current(),
            id: Uuid::from_u128(0),
            data: Bytes::new(),
        }
    }
    pub fn decode(&self) -> Result<Typedesc, DecodeError> {
        let cur = &mut Input::new(self.proto.clone(), self.data.clone());
        Typedesc::decode_with_id(self.id, cur)
    }
}

impl TryFrom<u8> for Cardinality {
    type Error = DecodeError;
    fn try_from(cardinality: u8) -> Result<Cardinality, DecodeError> {
        match cardinality {
            0x6e => Ok(Cardinality::NoResult),
            0x6f => Ok(Cardinality::AtMostOne),
            0x41 => Ok(Cardinality::One),
            0x6d => Ok(Cardinality::Many),
            _ => errors::InvalidCardinality { cardinality }.fail(),
        }
    }
}

impl TryFrom<u8> for IoFormat {
    type Error = DecodeError;
    fn try_from(io_format: u8) -> Result<IoFormat, DecodeError> {
        match io_format {
            0x62 => Ok(IoFormat::Binary),
            0x6a => Ok(IoFormat::Json),
            0x4a => Ok(IoFormat::JsonElements),
            _ => errors::InvalidIoFormat { io_format }.fail(),
        }
    }
}

impl TryFrom<u8> for DescribeAspect {
    type Error = DecodeError;
    fn try_from(aspect: u8) -> Result<DescribeAspect, DecodeError> {
        match aspect {
            0x54 => Ok(DescribeAspect::DataDescription),
            _ => errors::InvalidAspect { aspect }.fail(),
        }
    }
}
