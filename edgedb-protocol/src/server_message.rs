/*!
The [ServerMessage] enum and related types.

```rust,ignore
pub enum ServerMessage {
    Authentication(Authentication),
    CommandComplete(CommandComplete),
    CommandDataDescription(CommandDataDescription),
    Data(Data),
    DumpHeader(RawPacket),
    DumpBlock(RawPacket),
    ErrorResponse(ErrorResponse),
    LogMessage(LogMessage),
    ParameterStatus(ParameterStatus),
    PrepareComplete(PrepareComplete),
    ReadyForCommand(ReadyForCommand),
    RestoreReady(RestoreReady),
    ServerHandshake(ServerHandshake),
    ServerKeyData(ServerKeyData),
    UnknownMessage(u8, Bytes),
}
```
*/

use std::collections::HashMap;
use std::convert::TryFrom;

use bytes::{Buf, BufMut, Bytes};
use snafu::{ensure, OptionExt};
use uuid::Uuid;

pub use crate::common::{Cardinality, RawTypedesc};
use crate::descriptors::Typedesc;
use crate::encoding::{decode_kv, encode, encode_kv, Decode, Encode, Input, KeyValues, Output};
use crate::errors::{self, DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerMessage {
    Authentication(Authentication),
    CommandComplete(CommandComplete),
    CommandDataDescription(CommandDataDescription),
    Data(Data),
    // Dump packets are not decoded here as they are processed as whole
    // frames.
    DumpHeader(RawPacket),
    DumpBlock(RawPacket),
    ErrorResponse(ErrorResponse),
    LogMessage(LogMessage),
    ParameterStatus(ParameterStatus),
    PrepareComplete(PrepareComplete),
    ReadyForCommand(ReadyForCommand),
    RestoreReady(RestoreReady),
    ServerHandshake(ServerHandshake),
    ServerKeyData(ServerKeyData),
    UnknownMessage(u8, Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    Sasl { methods: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// Not in a transaction block.
    NotInTransaction = 0x49,
    /// In a transaction block.
    InTransaction = 0x54,
    /// In a failed transaction block; queries are rejected until the
    /// block is ended.
    InFailedTransaction = 0x45,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Fatal,
    Panic,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Debug,
    Info,
    Notice,
    Warning,
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyForCommand {
    pub headers: KeyValues,
    pub transaction_state: TransactionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub severity: ErrorSeverity,
    pub code: u32,
    pub message: String,
    pub attributes: KeyValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub severity: MessageSeverity,
    pub code: u32,
    pub text: String,
    pub attributes: KeyValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub major_ver: u16,
    pub minor_ver: u16,
    pub extensions: HashMap<String, KeyValues>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyData {
    pub data: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub proto: crate::features::ProtocolVersion,
    pub name: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub headers: KeyValues,
    pub status_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareComplete {
    pub headers: KeyValues,
    pub cardinality: Cardinality,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDataDescription {
    pub headers: KeyValues,
    pub result_cardinality: Cardinality,
    pub input: RawTypedesc,
    pub output: RawTypedesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub data: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReady {
    pub headers: KeyValues,
    pub jobs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub data: Bytes,
}

impl CommandDataDescription {
    pub fn output(&self) -> Result<Typedesc, DecodeError> {
        self.output.decode()
    }
    pub fn input(&self) -> Result<Typedesc, DecodeError> {
        self.input.decode()
    }
}

impl ParameterStatus {
    /// Splits the `system_config` parameter into its embedded type
    /// descriptor and the encoded config value.
    pub fn parse_system_config(self) -> Result<(Typedesc, Bytes), DecodeError> {
        let cur = &mut Input::new(self.proto.clone(), self.value);
        let typedesc_data = Bytes::decode(cur)?;
        let data = Bytes::decode(cur)?;

        let typedesc_buf = &mut Input::new(self.proto, typedesc_data);
        let typedesc_id = Uuid::decode(typedesc_buf)?;
        let typedesc = Typedesc::decode_with_id(typedesc_id, typedesc_buf)?;
        Ok((typedesc, data))
    }
}

impl ServerMessage {
    pub fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        use ServerMessage::*;
        match self {
            ServerHandshake(h) => encode(buf, 0x76, h),
            ErrorResponse(h) => encode(buf, 0x45, h),
            LogMessage(h) => encode(buf, 0x4c, h),
            Authentication(h) => encode(buf, 0x52, h),
            ReadyForCommand(h) => encode(buf, 0x5a, h),
            ServerKeyData(h) => encode(buf, 0x4b, h),
            ParameterStatus(h) => encode(buf, 0x53, h),
            CommandComplete(h) => encode(buf, 0x43, h),
            PrepareComplete(h) => encode(buf, 0x31, h),
            CommandDataDescription(h) => encode(buf, 0x54, h),
            Data(h) => encode(buf, 0x44, h),
            RestoreReady(h) => encode(buf, 0x2b, h),
            DumpHeader(h) => encode(buf, 0x40, h),
            DumpBlock(h) => encode(buf, 0x3d, h),

            UnknownMessage(_, _) => errors::UnknownMessageCantBeEncoded.fail()?,
        }
    }

    /// Decode exactly one frame from the buffer.
    ///
    /// This expects a full frame to already be in the buffer. Any bytes
    /// remaining in the buffer afterwards were not consumed by the
    /// message body; the caller decides whether that is worth a warning.
    pub fn decode(buf: &mut Input) -> Result<ServerMessage, DecodeError> {
        use self::ServerMessage as M;
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let mtype = buf.get_u8();
        let frame_len = buf.get_u32() as usize;
        ensure!(frame_len >= 4, errors::Underflow);
        ensure!(buf.remaining() >= frame_len - 4, errors::Underflow);
        let result = match mtype {
            0x76 => ServerHandshake::decode(buf).map(M::ServerHandshake)?,
            0x45 => ErrorResponse::decode(buf).map(M::ErrorResponse)?,
            0x4c => LogMessage::decode(buf).map(M::LogMessage)?,
            0x52 => Authentication::decode(buf).map(M::Authentication)?,
            0x5a => ReadyForCommand::decode(buf).map(M::ReadyForCommand)?,
            0x4b => ServerKeyData::decode(buf).map(M::ServerKeyData)?,
            0x53 => ParameterStatus::decode(buf).map(M::ParameterStatus)?,
            0x43 => CommandComplete::decode(buf).map(M::CommandComplete)?,
            0x31 => PrepareComplete::decode(buf).map(M::PrepareComplete)?,
            0x54 => CommandDataDescription::decode(buf).map(M::CommandDataDescription)?,
            0x44 => Data::decode(buf).map(M::Data)?,
            0x2b => RestoreReady::decode(buf).map(M::RestoreReady)?,
            0x40 => RawPacket::decode(buf).map(M::DumpHeader)?,
            0x3d => RawPacket::decode(buf).map(M::DumpBlock)?,
            code => {
                let len = buf.remaining();
                M::UnknownMessage(code, buf.copy_to_bytes(len))
            }
        };
        Ok(result)
    }
}

impl Encode for ServerHandshake {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(6);
        buf.put_u16(self.major_ver);
        buf.put_u16(self.minor_ver);
        buf.put_u16(
            u16::try_from(self.extensions.len())
                .ok()
                .context(errors::TooManyParams)?,
        );
        for (name, headers) in &self.extensions {
            name.as_str().encode(buf)?;
            encode_kv(buf, headers)?;
        }
        Ok(())
    }
}

impl Decode for ServerHandshake {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 6, errors::Underflow);
        let major_ver = buf.get_u16();
        let minor_ver = buf.get_u16();
        let extension_count = buf.get_u16();
        let mut extensions = HashMap::new();
        for _ in 0..extension_count {
            extensions.insert(String::decode(buf)?, decode_kv(buf)?);
        }
        Ok(ServerHandshake {
            major_ver,
            minor_ver,
            extensions,
        })
    }
}

impl Encode for Authentication {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        use Authentication as A;
        buf.reserve(4);
        match self {
            A::Ok => buf.put_u32(0),
            A::Sasl { methods } => {
                buf.put_u32(0x0A);
                buf.reserve(4);
                buf.put_u32(
                    u32::try_from(methods.len())
                        .ok()
                        .context(errors::TooManyMethods)?,
                );
                for method in methods {
                    method.encode(buf)?;
                }
            }
            A::SaslContinue { data } => {
                buf.put_u32(0x0B);
                data.encode(buf)?;
            }
            A::SaslFinal { data } => {
                buf.put_u32(0x0C);
                data.encode(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Authentication {
    fn decode(buf: &mut Input) -> Result<Authentication, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        match buf.get_u32() {
            0x00 => Ok(Authentication::Ok),
            0x0A => {
                ensure!(buf.remaining() >= 4, errors::Underflow);
                let method_count = buf.get_u32();
                let mut methods = Vec::with_capacity(method_count as usize);
                for _ in 0..method_count {
                    methods.push(String::decode(buf)?);
                }
                Ok(Authentication::Sasl { methods })
            }
            0x0B => Ok(Authentication::SaslContinue {
                data: Bytes::decode(buf)?,
            }),
            0x0C => Ok(Authentication::SaslFinal {
                data: Bytes::decode(buf)?,
            }),
            auth_status => errors::AuthStatusInvalid { auth_status }.fail(),
        }
    }
}

impl Encode for ReadyForCommand {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_kv(buf, &self.headers)?;
        buf.reserve(1);
        buf.put_u8(self.transaction_state as u8);
        Ok(())
    }
}

impl Decode for ReadyForCommand {
    fn decode(buf: &mut Input) -> Result<ReadyForCommand, DecodeError> {
        let headers = decode_kv(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let transaction_state = match buf.get_u8() {
            0x49 => TransactionState::NotInTransaction,
            0x54 => TransactionState::InTransaction,
            0x45 => TransactionState::InFailedTransaction,
            transaction_state => {
                return errors::InvalidTransactionState { transaction_state }.fail()
            }
        };
        Ok(ReadyForCommand {
            headers,
            transaction_state,
        })
    }
}

impl ErrorSeverity {
    pub fn from_u8(code: u8) -> ErrorSeverity {
        use ErrorSeverity::*;
        match code {
            120 => Error,
            200 => Fatal,
            255 => Panic,
            _ => Unknown(code),
        }
    }
    pub fn to_u8(&self) -> u8 {
        use ErrorSeverity::*;
        match *self {
            Error => 120,
            Fatal => 200,
            Panic => 255,
            Unknown(code) => code,
        }
    }
}

impl MessageSeverity {
    fn from_u8(code: u8) -> MessageSeverity {
        use MessageSeverity::*;
        match code {
            20 => Debug,
            40 => Info,
            60 => Notice,
            80 => Warning,
            _ => Unknown(code),
        }
    }
    fn to_u8(self) -> u8 {
        use MessageSeverity::*;
        match self {
            Debug => 20,
            Info => 40,
            Notice => 60,
            Warning => 80,
            Unknown(code) => code,
        }
    }
}

impl Encode for ErrorResponse {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(5);
        buf.put_u8(self.severity.to_u8());
        buf.put_u32(self.code);
        self.message.encode(buf)?;
        encode_kv(buf, &self.attributes)?;
        Ok(())
    }
}

impl Decode for ErrorResponse {
    fn decode(buf: &mut Input) -> Result<ErrorResponse, DecodeError> {
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let severity = ErrorSeverity::from_u8(buf.get_u8());
        let code = buf.get_u32();
        let message = String::decode(buf)?;
        let attributes = decode_kv(buf)?;
        Ok(ErrorResponse {
            severity,
            code,
            message,
            attributes,
        })
    }
}

impl Encode for LogMessage {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(5);
        buf.put_u8(self.severity.to_u8());
        buf.put_u32(self.code);
        self.text.encode(buf)?;
        encode_kv(buf, &self.attributes)?;
        Ok(())
    }
}

impl Decode for LogMessage {
    fn decode(buf: &mut Input) -> Result<LogMessage, DecodeError> {
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let severity = MessageSeverity::from_u8(buf.get_u8());
        let code = buf.get_u32();
        let text = String::decode(buf)?;
        let attributes = decode_kv(buf)?;
        Ok(LogMessage {
            severity,
            code,
            text,
            attributes,
        })
    }
}

impl Encode for ServerKeyData {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.extend_from_slice(&self.data);
        Ok(())
    }
}

impl Decode for ServerKeyData {
    fn decode(buf: &mut Input) -> Result<ServerKeyData, DecodeError> {
        ensure!(buf.remaining() >= 32, errors::Underflow);
        let mut data = [0u8; 32];
        buf.copy_to_slice(&mut data);
        Ok(ServerKeyData { data })
    }
}

impl Encode for ParameterStatus {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.name.encode(buf)?;
        self.value.encode(buf)?;
        Ok(())
    }
}

impl Decode for ParameterStatus {
    fn decode(buf: &mut Input) -> Result<ParameterStatus, DecodeError> {
        Ok(ParameterStatus {
            proto: buf.proto().clone(),
            name: Bytes::decode(buf)?,
            value: Bytes::decode(buf)?,
        })
    }
}

impl Encode for CommandComplete {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_kv(buf, &self.headers)?;
        self.status_data.encode(buf)?;
        Ok(())
    }
}

impl Decode for CommandComplete {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        Ok(CommandComplete {
            headers: decode_kv(buf)?,
            status_data: Bytes::decode(buf)?,
        })
    }
}

impl Encode for PrepareComplete {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_kv(buf, &self.headers)?;
        buf.reserve(33);
        buf.put_u8(self.cardinality as u8);
        self.input_typedesc_id.encode(buf)?;
        self.output_typedesc_id.encode(buf)?;
        Ok(())
    }
}

impl Decode for PrepareComplete {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let headers = decode_kv(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let cardinality = TryFrom::try_from(buf.get_u8())?;
        Ok(PrepareComplete {
            headers,
            cardinality,
            input_typedesc_id: Uuid::decode(buf)?,
            output_typedesc_id: Uuid::decode(buf)?,
        })
    }
}

impl Encode for CommandDataDescription {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_kv(buf, &self.headers)?;
        buf.reserve(1);
        buf.put_u8(self.result_cardinality as u8);
        self.input.id.encode(buf)?;
        self.input.data.encode(buf)?;
        self.output.id.encode(buf)?;
        self.output.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for CommandDataDescription {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let headers = decode_kv(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let result_cardinality = TryFrom::try_from(buf.get_u8())?;
        let input_id = Uuid::decode(buf)?;
        let input_data = Bytes::decode(buf)?;
        let output_id = Uuid::decode(buf)?;
        let output_data = Bytes::decode(buf)?;
        Ok(CommandDataDescription {
            headers,
            result_cardinality,
            input: RawTypedesc {
                proto: buf.proto().clone(),
                id: input_id,
                data: input_data,
            },
            output: RawTypedesc {
                proto: buf.proto().clone(),
                id: output_id,
                data: output_data,
            },
        })
    }
}

impl Encode for Data {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(2);
        buf.put_u16(
            u16::try_from(self.data.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for chunk in &self.data {
            chunk.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Data {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let chunk_count = buf.get_u16();
        let mut data = Vec::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            data.push(Bytes::decode(buf)?);
        }
        Ok(Data { data })
    }
}

impl Encode for RestoreReady {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_kv(buf, &self.headers)?;
        buf.reserve(2);
        buf.put_u16(self.jobs);
        Ok(())
    }
}

impl Decode for RestoreReady {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let headers = decode_kv(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        Ok(RestoreReady {
            headers,
            jobs: buf.get_u16(),
        })
    }
}

impl Encode for RawPacket {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.extend(&self.data);
        Ok(())
    }
}

impl Decode for RawPacket {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let len = buf.remaining();
        Ok(RawPacket {
            data: buf.copy_to_bytes(len),
        })
    }
}

impl From<ErrorResponse> for edgedb_errors::Error {
    fn from(err: ErrorResponse) -> edgedb_errors::Error {
        edgedb_errors::Error::from_code_and_message(err.code, err.message)
            .with_headers(err.attributes)
    }
}
