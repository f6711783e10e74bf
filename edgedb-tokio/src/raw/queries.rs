use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use uuid::Uuid;

use edgedb_errors::{
    ClientConnectionClosedError, ClientConnectionEosError, ClientInconsistentError, Error,
    ErrorKind, InvalidArgumentError, MissingArgumentError, ProtocolEncodingError, ProtocolError,
    ProtocolOutOfOrderError, ResultCardinalityMismatchError, UnknownArgumentError,
};
use edgedb_protocol::client_message::{
    ClientMessage, DescribeStatement, Execute, Prepare,
};
use edgedb_protocol::codec::{Codec, NOTHING};
use edgedb_protocol::common::{
    Capabilities, Cardinality, CompilationOptions, DescribeAspect, IoFormat,
};
use edgedb_protocol::encoding::{KeyValues, Output};
use edgedb_protocol::features::ProtocolVersion;
use edgedb_protocol::server_message::{
    CommandDataDescription, Data, PrepareComplete, ServerMessage,
};
use edgedb_protocol::value::Value;
use edgedb_protocol::QueryResult;

use super::{Arguments, Connection, Mode};

pub(crate) struct Guard;

impl Connection {
    pub(crate) fn begin_request(&mut self) -> Result<Guard, Error> {
        match self.mode {
            Mode::Normal { .. } => {
                self.mode = Mode::Dirty;
                Ok(Guard)
            }
            Mode::Dirty => Err(ClientInconsistentError::with_message(
                "the connection is in the middle of another request",
            )),
            Mode::Closed => Err(ClientConnectionClosedError::build()),
        }
    }

    pub(crate) fn end_request(&mut self, _guard: Guard) {
        self.mode = Mode::Normal {
            idle_since: Instant::now(),
        };
    }

    /// Drains messages until `ReadyForCommand`; only then is the
    /// pipeline over and the connection usable again.
    pub(crate) async fn expect_ready(&mut self, guard: Guard) -> Result<(), Error> {
        loop {
            let msg = self.message().await?;
            if let ServerMessage::ReadyForCommand(ready) = msg {
                self.transaction_state = ready.transaction_state;
                self.end_request(guard);
                return Ok(());
            }
        }
    }

    pub(crate) async fn expect_ready_or_eos(&mut self, guard: Guard) -> Result<(), Error> {
        match self.expect_ready(guard).await {
            Ok(()) => Ok(()),
            Err(e) if e.is::<ClientConnectionEosError>() => {
                debug_assert!(!self.is_consistent());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn prepare(
        &mut self,
        flags: &CompilationOptions,
        query: &str,
    ) -> Result<PrepareComplete, Error> {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Prepare(Prepare::new(flags, query)),
            ClientMessage::Sync,
        ])
        .await?;

        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::PrepareComplete(prepared) => {
                    self.expect_ready(guard).await?;
                    return Ok(prepared);
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    pub async fn describe_data(&mut self) -> Result<CommandDataDescription, Error> {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::DescribeStatement(DescribeStatement {
                headers: KeyValues::new(),
                aspect: DescribeAspect::DataDescription,
                statement_name: Bytes::from(""),
            }),
            ClientMessage::Sync,
        ])
        .await?;

        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::CommandDataDescription(desc) => {
                    self.expect_ready(guard).await?;
                    return Ok(desc);
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    pub(crate) async fn execute_prepared(&mut self, arguments: Bytes) -> Result<Vec<Data>, Error> {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Execute(Execute {
                headers: KeyValues::new(),
                statement_name: Bytes::from(""),
                arguments,
            }),
            ClientMessage::Sync,
        ])
        .await?;

        let mut data = Vec::new();
        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::Data(datum) => data.push(datum),
                ServerMessage::CommandComplete(..) => {
                    self.expect_ready(guard).await?;
                    return Ok(data);
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    /// Runs one query through the full prepare/describe/execute
    /// pipeline and decodes the result rows.
    pub async fn query<R: QueryResult>(
        &mut self,
        query: &str,
        arguments: &Arguments,
        io_format: IoFormat,
        expected_cardinality: Cardinality,
        allow_capabilities: Capabilities,
    ) -> Result<Vec<R>, Error> {
        let flags = CompilationOptions {
            implicit_limit: None,
            implicit_typenames: false,
            implicit_typeids: false,
            explicit_objectids: false,
            allow_capabilities,
            io_format,
            expected_cardinality,
        };
        let prepared = self.prepare(&flags, query).await?;

        if !self.registry.contains(&prepared.input_typedesc_id)
            || !self.registry.contains(&prepared.output_typedesc_id)
        {
            let desc = self.describe_data().await?;
            let input = desc.input().map_err(ProtocolEncodingError::with_source)?;
            self.registry
                .build(&input)
                .map_err(ProtocolEncodingError::with_source)?;
            let output = desc.output().map_err(ProtocolEncodingError::with_source)?;
            self.registry
                .build(&output)
                .map_err(ProtocolEncodingError::with_source)?;
        }
        let input_codec = self
            .registry
            .get(&prepared.input_typedesc_id)
            .ok_or_else(|| codec_missing(&prepared.input_typedesc_id))?;
        let output_codec = self
            .registry
            .get(&prepared.output_typedesc_id)
            .ok_or_else(|| codec_missing(&prepared.output_typedesc_id))?;

        let arguments = encode_arguments(
            &self.proto,
            &input_codec,
            prepared.input_typedesc_id,
            arguments,
        )?;
        let data = self.execute_prepared(arguments).await?;

        let count = data.iter().map(|d| d.data.len()).sum();
        check_cardinality(expected_cardinality, count)?;

        let mut rows = Vec::with_capacity(count);
        for chunk in data.iter().flat_map(|d| d.data.iter()) {
            rows.push(R::decode(&output_codec, &self.proto, chunk)?);
        }
        Ok(rows)
    }

    /// Runs a statement for its side effects, ignoring any rows.
    pub async fn statement(&mut self, query: &str) -> Result<(), Error> {
        self.query::<Value>(
            query,
            &Arguments::new(),
            IoFormat::Binary,
            Cardinality::Many,
            Capabilities::ALL,
        )
        .await
        .map(|_| ())
    }
}

fn codec_missing(id: &Uuid) -> Error {
    ProtocolError::with_message(format!("codec {id} is missing after Describe"))
}

/// Matches the argument map against the declared input shape and
/// produces the argument blob for `Execute`.
pub(crate) fn encode_arguments(
    proto: &ProtocolVersion,
    codec: &Arc<dyn Codec>,
    descriptor_id: Uuid,
    arguments: &Arguments,
) -> Result<Bytes, Error> {
    match codec.input_fields() {
        Some(shape) => {
            for name in arguments.keys() {
                if shape.field_position(name).is_none() {
                    return Err(UnknownArgumentError::with_message(format!(
                        "the query does not take an argument ${name}"
                    )));
                }
            }
            let mut fields = Vec::with_capacity(shape.elements.len());
            for element in &shape.elements {
                let Some(value) = arguments.get(&element.name) else {
                    return Err(MissingArgumentError::with_message(format!(
                        "the argument ${} is required", element.name
                    )));
                };
                fields.push(value.clone());
            }
            let value = Value::NamedTuple {
                shape: shape.clone(),
                fields,
            };
            let mut buf = BytesMut::new();
            codec
                .encode(&mut Output::new(proto, &mut buf), &value)
                .map_err(InvalidArgumentError::with_source)?;
            Ok(buf.freeze())
        }
        None => {
            if let Some(name) = arguments.keys().next() {
                return Err(UnknownArgumentError::with_message(format!(
                    "the query does not take an argument ${name}"
                )));
            }
            if descriptor_id == NOTHING {
                return Ok(Bytes::new());
            }
            let mut buf = BytesMut::new();
            codec
                .encode(&mut Output::new(proto, &mut buf), &Value::Tuple(Vec::new()))
                .map_err(InvalidArgumentError::with_source)?;
            Ok(buf.freeze())
        }
    }
}

pub(crate) fn check_cardinality(expected: Cardinality, actual: usize) -> Result<(), Error> {
    use Cardinality::*;
    match (expected, actual) {
        (NoResult, 0) | (AtMostOne, 0 | 1) | (One, 1) | (Many, _) => Ok(()),
        (NoResult, rows) => Err(ResultCardinalityMismatchError::with_message(format!(
            "no result was expected, but the query returned {rows} rows"
        ))),
        (AtMostOne, rows) => Err(ResultCardinalityMismatchError::with_message(format!(
            "expected at most one row, but the query returned {rows}"
        ))),
        (One, rows) => Err(ResultCardinalityMismatchError::with_message(format!(
            "expected exactly one row, but the query returned {rows}"
        ))),
    }
}
