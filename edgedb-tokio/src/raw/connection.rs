use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use rustls_pki_types::ServerName;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use edgedb_errors::{
    AuthenticationError, ClientConnectionEosError, ClientConnectionError,
    ClientConnectionFailedError, ClientConnectionTimeoutError, ClientError, Error, ErrorKind,
    ProtocolEncodingError, UnexpectedMessageError,
};
use edgedb_protocol::client_message::{
    ClientHandshake, ClientMessage, SaslInitialResponse, SaslResponse,
};
use edgedb_protocol::codec::CodecRegistry;
use edgedb_protocol::encoding::{Input, Output};
use edgedb_protocol::features::ProtocolVersion;
use edgedb_protocol::server_message::{
    Authentication, MessageSeverity, ParameterStatus, ServerMessage, TransactionState,
};
use edgedb_protocol::value::Value;

use super::{AsyncIo, DisconnectHook, Mode, Phase, ServerParams, Stream};
use crate::builder::Config;
use crate::scram::{ScramClient, SCRAM_METHOD};
use crate::tls;

/// Each step of the authentication exchange must complete within this
/// time.
pub(crate) const SASL_STEP_TIMEOUT: Duration = Duration::from_secs(15);

/// A single authenticated connection to the server.
///
/// One read loop per connection runs in a background task and routes
/// messages: log messages and parameter updates are absorbed right
/// there, everything else is queued for whoever holds the connection.
/// At most one request pipeline can be in flight at a time; the
/// [Mode] guard enforces that.
pub struct Connection {
    pub(crate) proto: ProtocolVersion,
    pub(crate) registry: CodecRegistry,
    pub(crate) mode: Mode,
    pub(crate) transaction_state: TransactionState,
    phase: Phase,
    server_key_data: Option<[u8; 32]>,
    params: Arc<Mutex<ServerParams>>,
    write: WriteHalf<Stream>,
    inbound: UnboundedReceiver<ServerMessage>,
    error_slot: Arc<Mutex<Option<Error>>>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Connection {
    /// Opens a TLS connection to the configured server and performs
    /// the protocol handshake.
    pub async fn connect(
        config: &Config,
        registry: &CodecRegistry,
        on_disconnect: Option<DisconnectHook>,
    ) -> Result<Connection, Error> {
        let stream = connect_stream(config).await?;
        Connection::handshake(stream, config, registry, on_disconnect).await
    }

    /// Performs the protocol handshake over an established stream.
    pub async fn handshake(
        stream: impl AsyncIo,
        config: &Config,
        registry: &CodecRegistry,
        on_disconnect: Option<DisconnectHook>,
    ) -> Result<Connection, Error> {
        let proto = ProtocolVersion::current();
        let (read, write) = split(Box::new(stream) as Stream);
        let (tx, inbound) = unbounded_channel();
        let params = Arc::new(Mutex::new(ServerParams::default()));
        let error_slot = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(read_loop(
            read,
            proto.clone(),
            tx,
            params.clone(),
            error_slot.clone(),
            on_disconnect,
        ));
        let mut conn = Connection {
            proto,
            registry: registry.clone(),
            mode: Mode::Normal {
                idle_since: Instant::now(),
            },
            transaction_state: TransactionState::NotInTransaction,
            phase: Phase::Connecting,
            server_key_data: None,
            params,
            write,
            inbound,
            error_slot,
            reader,
        };
        match conn.login(config).await {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.phase = Phase::Closed;
                conn.mode = Mode::Closed;
                Err(e)
            }
        }
    }

    async fn login(&mut self, config: &Config) -> Result<(), Error> {
        let mut params = HashMap::new();
        params.insert(String::from("user"), config.user.clone());
        params.insert(String::from("database"), config.database.clone());
        self.send_messages(&[ClientMessage::ClientHandshake(ClientHandshake {
            major_ver: 1,
            minor_ver: 0,
            params,
            extensions: HashMap::new(),
        })])
        .await?;
        self.phase = Phase::Authenticating;

        let mut msg = self.auth_step().await?;
        if let ServerMessage::ServerHandshake(hs) = &msg {
            if !ProtocolVersion::new(hs.major_ver, hs.minor_ver).supported() {
                return Err(ClientConnectionFailedError::with_message(format!(
                    "server requires protocol version {}.{}",
                    hs.major_ver, hs.minor_ver
                )));
            }
            msg = self.auth_step().await?;
        }
        match msg {
            ServerMessage::Authentication(Authentication::Ok) => {}
            ServerMessage::Authentication(Authentication::Sasl { methods }) => {
                self.sasl_exchange(config, &methods).await?;
            }
            ServerMessage::ErrorResponse(err) => return Err(err.into()),
            msg => return Err(unexpected(&msg, "an authentication message")),
        }

        loop {
            match self.auth_step().await? {
                ServerMessage::ServerKeyData(key) => self.server_key_data = Some(key.data),
                ServerMessage::ReadyForCommand(ready) => {
                    self.transaction_state = ready.transaction_state;
                    self.phase = Phase::Ready;
                    return Ok(());
                }
                ServerMessage::ErrorResponse(err) => return Err(err.into()),
                msg => return Err(unexpected(&msg, "ReadyForCommand")),
            }
        }
    }

    async fn sasl_exchange(&mut self, config: &Config, methods: &[String]) -> Result<(), Error> {
        if methods.first().map(String::as_str) != Some(SCRAM_METHOD) {
            return Err(AuthenticationError::with_message(format!(
                "server requested unsupported authentication methods {methods:?}"
            )));
        }
        let scram = ScramClient::new(&config.user, &config.password);
        self.send_messages(&[ClientMessage::AuthenticationSaslInitialResponse(
            SaslInitialResponse {
                method: SCRAM_METHOD.into(),
                data: Bytes::from(scram.client_first()),
            },
        )])
        .await?;

        let data = match self.auth_step().await? {
            ServerMessage::Authentication(Authentication::SaslContinue { data }) => data,
            ServerMessage::ErrorResponse(err) => return Err(err.into()),
            msg => return Err(unexpected(&msg, "SASL continuation")),
        };
        let server_first = sasl_text(&data)?;
        let (client_final, verifier) = scram.handle_server_first(server_first)?;
        self.send_messages(&[ClientMessage::AuthenticationSaslResponse(SaslResponse {
            data: Bytes::from(client_final),
        })])
        .await?;

        let data = match self.auth_step().await? {
            ServerMessage::Authentication(Authentication::SaslFinal { data }) => data,
            ServerMessage::ErrorResponse(err) => return Err(err.into()),
            msg => return Err(unexpected(&msg, "SASL final message")),
        };
        verifier.verify(sasl_text(&data)?)?;

        match self.auth_step().await? {
            ServerMessage::Authentication(Authentication::Ok) => Ok(()),
            ServerMessage::ErrorResponse(err) => Err(err.into()),
            msg => Err(unexpected(&msg, "AuthenticationOK")),
        }
    }

    async fn auth_step(&mut self) -> Result<ServerMessage, Error> {
        timeout(SASL_STEP_TIMEOUT, self.message())
            .await
            .map_err(|_| {
                ClientConnectionTimeoutError::with_message(
                    "timed out waiting for an authentication message",
                )
            })?
    }

    /// Receives the next foreground message, in the exact order the
    /// server sent them.
    pub(crate) async fn message(&mut self) -> Result<ServerMessage, Error> {
        match self.inbound.recv().await {
            Some(msg) => Ok(msg),
            None => {
                self.mode = Mode::Closed;
                self.phase = Phase::Closed;
                Err(self
                    .error_slot
                    .lock()
                    .expect("error slot")
                    .take()
                    .unwrap_or_else(|| {
                        ClientConnectionEosError::with_message("connection closed")
                    }))
            }
        }
    }

    /// Writes a batch of messages as one contiguous sequence of bytes.
    pub(crate) async fn send_messages(&mut self, messages: &[ClientMessage]) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        {
            let mut out = Output::new(&self.proto, &mut buf);
            for message in messages {
                message
                    .encode(&mut out)
                    .map_err(ProtocolEncodingError::with_source)?;
            }
        }
        self.write
            .write_all(&buf)
            .await
            .map_err(ClientConnectionError::with_source)?;
        self.write
            .flush()
            .await
            .map_err(ClientConnectionError::with_source)?;
        Ok(())
    }

    /// Whether the connection can accept another request.
    pub fn is_consistent(&self) -> bool {
        matches!(self.mode, Mode::Normal { .. })
            && self.error_slot.lock().expect("error slot").is_none()
    }

    pub fn phase(&self) -> Phase {
        if self.error_slot.lock().expect("error slot").is_some() {
            Phase::Closed
        } else {
            self.phase
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    /// The 32-byte key the server issued for out-of-band operations.
    pub fn server_key_data(&self) -> Option<[u8; 32]> {
        self.server_key_data
    }

    pub fn suggested_pool_concurrency(&self) -> Option<usize> {
        self.params
            .lock()
            .expect("server params")
            .suggested_pool_concurrency
    }

    /// The decoded `system_config` parameter, when the server sent one.
    pub fn system_config(&self) -> Option<Value> {
        self.params.lock().expect("server params").system_config.clone()
    }

    pub fn server_param(&self, name: &str) -> Option<Bytes> {
        self.params.lock().expect("server params").raw.get(name).cloned()
    }

    /// Politely closes the connection.
    pub async fn terminate(mut self) -> Result<(), Error> {
        self.send_messages(&[ClientMessage::Terminate]).await
    }
}

pub(crate) async fn connect_stream(config: &Config) -> Result<Stream, Error> {
    let connector = tls::connector(config)?;
    let tcp = timeout(
        config.connect_timeout,
        TcpStream::connect((&config.host[..], config.port)),
    )
    .await
    .map_err(|_| ClientConnectionTimeoutError::with_message("TCP connect timed out"))?
    .map_err(ClientConnectionFailedError::with_source)?;
    tcp.set_nodelay(true).map_err(ClientError::with_source)?;
    let name = ServerName::try_from(config.host.clone())
        .map_err(ClientConnectionFailedError::with_source)?;
    let stream = timeout(config.connect_timeout, connector.connect(name, tcp))
        .await
        .map_err(|_| ClientConnectionTimeoutError::with_message("TLS handshake timed out"))?
        .map_err(ClientConnectionFailedError::with_source)?;
    Ok(Box::new(stream))
}

fn sasl_text(data: &Bytes) -> Result<&str, Error> {
    std::str::from_utf8(data)
        .map_err(|_| AuthenticationError::with_message("SASL message is not valid utf-8"))
}

pub(crate) fn unexpected(msg: &ServerMessage, expected: &str) -> Error {
    UnexpectedMessageError::with_message(format!("expected {expected}, got {msg:?}"))
}

/// The single reader: frames and decodes every inbound message, feeds
/// background messages to their handlers, and queues the rest in
/// arrival order. When the stream dies it records the error, wakes all
/// pending receivers and fires the disconnect hook.
async fn read_loop(
    mut stream: ReadHalf<Stream>,
    proto: ProtocolVersion,
    tx: UnboundedSender<ServerMessage>,
    params: Arc<Mutex<ServerParams>>,
    error_slot: Arc<Mutex<Option<Error>>>,
    on_disconnect: Option<DisconnectHook>,
) {
    if let Err(e) = read_messages(&mut stream, &proto, &tx, &params).await {
        *error_slot.lock().expect("error slot") = Some(e);
    }
    drop(tx);
    if let Some(hook) = on_disconnect {
        hook();
    }
}

async fn read_messages(
    stream: &mut ReadHalf<Stream>,
    proto: &ProtocolVersion,
    tx: &UnboundedSender<ServerMessage>,
    params: &Arc<Mutex<ServerParams>>,
) -> Result<(), Error> {
    loop {
        let mut head = [0u8; 5];
        read_exact(stream, &mut head).await?;
        let frame_len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        if frame_len < 4 {
            return Err(ProtocolEncodingError::with_message(format!(
                "message {:#x} declares length {frame_len}",
                head[0]
            )));
        }
        let mut frame = vec![0u8; frame_len + 1];
        frame[..5].copy_from_slice(&head);
        read_exact(stream, &mut frame[5..]).await?;

        let mut input = Input::new(proto.clone(), Bytes::from(frame));
        let msg =
            ServerMessage::decode(&mut input).map_err(ProtocolEncodingError::with_source)?;
        if input.remaining() > 0 {
            log::warn!(
                "message {:#x}: {} trailing bytes were not consumed by the decoder",
                head[0],
                input.remaining(),
            );
        }
        match msg {
            ServerMessage::LogMessage(msg) => {
                use MessageSeverity::*;
                match msg.severity {
                    Debug => log::debug!("server message: {}", msg.text),
                    Info | Notice => log::info!("server message: {}", msg.text),
                    Warning | Unknown(_) => log::warn!("server message: {}", msg.text),
                }
            }
            ServerMessage::ParameterStatus(status) => {
                absorb_parameter(status, params);
            }
            ServerMessage::UnknownMessage(tag, _) => {
                log::error!("unknown message type {tag:#x} received; skipping");
            }
            msg => {
                if tx.send(msg).is_err() {
                    // connection object is gone; stop reading
                    return Ok(());
                }
            }
        }
    }
}

async fn read_exact(stream: &mut ReadHalf<Stream>, buf: &mut [u8]) -> Result<(), Error> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(
            ClientConnectionEosError::with_message("server closed the connection"),
        ),
        Err(e) => Err(ClientConnectionError::with_source(e)),
    }
}

fn absorb_parameter(status: ParameterStatus, params: &Arc<Mutex<ServerParams>>) {
    let name = String::from_utf8_lossy(&status.name).into_owned();
    let value = status.value.clone();
    match &name[..] {
        "suggested_pool_concurrency" => {
            let parsed = std::str::from_utf8(&value)
                .ok()
                .and_then(|v| v.parse::<usize>().ok());
            match parsed {
                Some(concurrency) => {
                    params.lock().expect("server params").suggested_pool_concurrency =
                        Some(concurrency);
                }
                None => log::warn!("cannot decode suggested_pool_concurrency: {value:?}"),
            }
        }
        "system_config" => match decode_system_config(status) {
            Ok(config) => {
                params.lock().expect("server params").system_config = Some(config);
            }
            Err(e) => log::warn!("cannot decode system_config: {e:#}"),
        },
        _ => {}
    }
    params.lock().expect("server params").raw.insert(name, value);
}

fn decode_system_config(status: ParameterStatus) -> Result<Value, Error> {
    let proto = status.proto.clone();
    let (typedesc, data) = status
        .parse_system_config()
        .map_err(ProtocolEncodingError::with_source)?;
    let codec = typedesc
        .build_codec()
        .map_err(ProtocolEncodingError::with_source)?;
    let mut input = Input::new(proto, data);
    codec
        .decode(&mut input)
        .map_err(ProtocolEncodingError::with_source)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::duplex;

    use edgedb_errors::{QueryError, ResultCardinalityMismatchError};
    use edgedb_protocol::codec::{STD_INT64, STD_STR};
    use edgedb_protocol::common::{Capabilities, Cardinality, IoFormat};

    use crate::builder::Builder;
    use crate::mock::{MockServer, QueryScript};
    use crate::raw::Arguments;

    fn test_config() -> Config {
        Builder::new().password("secret").build().unwrap()
    }

    async fn connect_to_mock(
        server_script: impl std::future::Future<Output = ()> + Send + 'static,
        client_io: impl super::AsyncIo,
    ) -> (Connection, tokio::task::JoinHandle<()>) {
        let server = tokio::spawn(server_script);
        let registry = CodecRegistry::new();
        let conn = Connection::handshake(client_io, &test_config(), &registry, None)
            .await
            .expect("handshake");
        (conn, server)
    }

    #[tokio::test]
    async fn hello_world() {
        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                mock.serve_query(QueryScript::rows(
                    STD_STR,
                    vec![Bytes::from_static(b"Hello, Dotnet!")],
                ))
                .await;
            },
            client_io,
        )
        .await;

        assert_eq!(conn.phase(), Phase::Ready);
        assert_eq!(conn.server_key_data(), Some([7u8; 32]));
        let rows: Vec<String> = conn
            .query(
                "select 'Hello, Dotnet!'",
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::Many,
                Capabilities::ALL,
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![String::from("Hello, Dotnet!")]);
        assert!(conn.is_consistent());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn describe_fills_registry_and_binds_arguments() {
        let input_id: uuid::Uuid = "ee8db72e-13b0-5af1-aa96-54f63e9671e8".parse().unwrap();

        let mut input_blob = vec![2u8];
        input_blob.extend(STD_INT64.as_bytes());
        input_blob.push(4); // named tuple
        input_blob.extend(input_id.as_bytes());
        input_blob.extend([0, 2]);
        input_blob.extend([0, 0, 0, 1, b'x', 0, 0]);
        input_blob.extend([0, 0, 0, 1, b'y', 0, 0]);
        let mut output_blob = vec![2u8];
        output_blob.extend(STD_INT64.as_bytes());

        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                mock.serve_query(QueryScript {
                    input_id,
                    output_id: STD_INT64,
                    describe: Some((input_blob.into(), output_blob.into())),
                    expect_arguments: Some(Bytes::from_static(
                        b"\0\0\0\x02\
                          \0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x02\
                          \0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x03",
                    )),
                    result: Ok(vec![Bytes::from_static(b"\0\0\0\0\0\0\0\x05")]),
                })
                .await;
            },
            client_io,
        )
        .await;

        let mut args = Arguments::new();
        args.insert("x".into(), Value::Int64(2));
        args.insert("y".into(), Value::Int64(3));
        let rows: Vec<i64> = conn
            .query(
                "select <int64>$x + <int64>$y",
                &args,
                IoFormat::Binary,
                Cardinality::Many,
                Capabilities::ALL,
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![5]);
        assert!(conn.registry.contains(&input_id));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn cardinality_mismatch() {
        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                mock.serve_query(QueryScript::rows(
                    STD_INT64,
                    vec![
                        Bytes::from_static(b"\0\0\0\0\0\0\0\x01"),
                        Bytes::from_static(b"\0\0\0\0\0\0\0\x02"),
                    ],
                ))
                .await;
            },
            client_io,
        )
        .await;

        let err = conn
            .query::<i64>(
                "select {1,2}",
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::AtMostOne,
                Capabilities::ALL,
            )
            .await
            .unwrap_err();
        assert!(err.is::<ResultCardinalityMismatchError>());
        // the pipeline itself completed; the connection stays usable
        assert!(conn.is_consistent());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_response() {
        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                mock.serve_prepare_error(0x04010100, "Unexpected ';'").await;
            },
            client_io,
        )
        .await;

        let err = conn
            .query::<Value>(
                "select ;",
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::Many,
                Capabilities::ALL,
            )
            .await
            .unwrap_err();
        assert!(err.is::<QueryError>());
        assert_eq!(err.kind_name(), "EdgeQLSyntaxError");
        assert!(conn.is_consistent());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_lost_mid_query() {
        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                // read the Prepare, then go away
                mock.recv().await;
            },
            client_io,
        )
        .await;

        let err = conn
            .query::<Value>(
                "select 1",
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::Many,
                Capabilities::ALL,
            )
            .await
            .unwrap_err();
        assert!(err.is::<ClientConnectionError>());
        assert!(!conn.is_consistent());
        assert_eq!(conn.phase(), Phase::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_messages_and_parameters_are_absorbed() {
        let (client_io, server_io) = duplex(1 << 16);
        let (mut conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake_with_params("secret", &[("application_name", b"mock")])
                    .await;
                // an unknown message type must be skipped, not break
                // the pipeline
                mock.send_raw(b"q\0\0\0\x04").await;
                mock.serve_query(QueryScript::rows(
                    STD_STR,
                    vec![Bytes::from_static(b"ok")],
                ))
                .await;
            },
            client_io,
        )
        .await;

        let rows: Vec<String> = conn
            .query(
                "select 'ok'",
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::Many,
                Capabilities::ALL,
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![String::from("ok")]);
        assert_eq!(
            conn.server_param("application_name"),
            Some(Bytes::from_static(b"mock"))
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn terminate_sends_message() {
        let (client_io, server_io) = duplex(1 << 16);
        let (conn, server) = connect_to_mock(
            async move {
                let mut mock = MockServer::new(server_io);
                mock.handshake("secret").await;
                let msg = mock.try_recv().await;
                assert!(matches!(
                    msg,
                    Some(edgedb_protocol::client_message::ClientMessage::Terminate)
                ));
            },
            client_io,
        )
        .await;

        conn.terminate().await.unwrap();
        server.await.unwrap();
    }
}
