//! A scripted in-memory server used by the unit tests. It speaks just
//! enough of the protocol to drive the real client code end to end,
//! including a full SCRAM exchange.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use uuid::Uuid;

use edgedb_protocol::client_message::ClientMessage;
use edgedb_protocol::codec::NOTHING;
use edgedb_protocol::common::{Cardinality, RawTypedesc};
use edgedb_protocol::encoding::{Input, KeyValues, Output};
use edgedb_protocol::features::ProtocolVersion;
use edgedb_protocol::server_message::{
    Authentication, CommandComplete, CommandDataDescription, Data, ErrorResponse, ErrorSeverity,
    ParameterStatus, RawPacket, ReadyForCommand, ServerKeyData, ServerMessage, TransactionState,
};

use crate::scram::{hi, hmac};

pub(crate) const MOCK_SALT: &[u8] = b"mock salt 123456";
pub(crate) const MOCK_ITERATIONS: u32 = 1024;

pub(crate) struct MockServer {
    stream: DuplexStream,
    proto: ProtocolVersion,
}

/// One scripted prepare/describe/execute pipeline.
pub(crate) struct QueryScript {
    pub input_id: Uuid,
    pub output_id: Uuid,
    pub describe: Option<(Bytes, Bytes)>,
    pub expect_arguments: Option<Bytes>,
    pub result: Result<Vec<Bytes>, (u32, String)>,
}

impl QueryScript {
    pub fn rows(output_id: Uuid, rows: Vec<Bytes>) -> QueryScript {
        QueryScript {
            input_id: NOTHING,
            output_id,
            describe: None,
            expect_arguments: None,
            result: Ok(rows),
        }
    }
    pub fn statement_ok() -> QueryScript {
        QueryScript::rows(NOTHING, Vec::new())
    }
    pub fn error(code: u32, message: &str) -> QueryScript {
        QueryScript {
            input_id: NOTHING,
            output_id: NOTHING,
            describe: None,
            expect_arguments: None,
            result: Err((code, message.into())),
        }
    }
}

pub(crate) fn ready() -> ServerMessage {
    ServerMessage::ReadyForCommand(ReadyForCommand {
        headers: KeyValues::new(),
        transaction_state: TransactionState::NotInTransaction,
    })
}

pub(crate) fn command_complete() -> ServerMessage {
    ServerMessage::CommandComplete(CommandComplete {
        headers: KeyValues::new(),
        status_data: Bytes::from_static(b"ok"),
    })
}

impl MockServer {
    pub fn new(stream: DuplexStream) -> MockServer {
        MockServer {
            stream,
            proto: ProtocolVersion::current(),
        }
    }

    /// Receives the next message, transparently skipping `Sync`.
    pub async fn recv(&mut self) -> ClientMessage {
        self.try_recv().await.expect("unexpected end of stream")
    }

    pub async fn try_recv(&mut self) -> Option<ClientMessage> {
        loop {
            let mut head = [0u8; 5];
            if self.stream.read_exact(&mut head).await.is_err() {
                return None;
            }
            let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
            let mut frame = vec![0u8; len + 1];
            frame[..5].copy_from_slice(&head);
            self.stream
                .read_exact(&mut frame[5..])
                .await
                .expect("frame body");
            let mut input = Input::new(self.proto.clone(), Bytes::from(frame));
            let msg = ClientMessage::decode(&mut input).expect("client message");
            if !matches!(msg, ClientMessage::Sync) {
                return Some(msg);
            }
        }
    }

    pub async fn send(&mut self, messages: &[ServerMessage]) {
        let mut buf = BytesMut::new();
        {
            let mut out = Output::new(&self.proto, &mut buf);
            for message in messages {
                message.encode(&mut out).expect("server message");
            }
        }
        self.stream.write_all(&buf).await.expect("server write");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("server write");
    }

    pub async fn handshake(&mut self, password: &str) {
        self.handshake_with_params(password, &[]).await;
    }

    /// Runs the server side of the handshake, verifying the client's
    /// SCRAM proof on the way, and reports `params` before the final
    /// ReadyForCommand.
    pub async fn handshake_with_params(&mut self, password: &str, params: &[(&str, &[u8])]) {
        let Some(ClientMessage::ClientHandshake(hs)) = self.try_recv().await else {
            panic!("expected ClientHandshake");
        };
        assert_eq!((hs.major_ver, hs.minor_ver), (1, 0));
        self.send(&[ServerMessage::Authentication(Authentication::Sasl {
            methods: vec!["SCRAM-SHA-256".into()],
        })])
        .await;

        let Some(ClientMessage::AuthenticationSaslInitialResponse(initial)) =
            self.try_recv().await
        else {
            panic!("expected SASL initial response");
        };
        assert_eq!(initial.method, "SCRAM-SHA-256");
        let client_first = String::from_utf8(initial.data.to_vec()).unwrap();
        let client_first_bare = client_first
            .strip_prefix("n,,")
            .expect("gs2 header")
            .to_owned();
        let client_nonce = client_first_bare
            .split_once(",r=")
            .expect("client nonce")
            .1
            .to_owned();
        let server_first = format!(
            "r={client_nonce}f00ba4,s={},i={MOCK_ITERATIONS}",
            BASE64.encode(MOCK_SALT),
        );
        self.send(&[ServerMessage::Authentication(Authentication::SaslContinue {
            data: Bytes::from(server_first.clone()),
        })])
        .await;

        let Some(ClientMessage::AuthenticationSaslResponse(response)) = self.try_recv().await
        else {
            panic!("expected SASL response");
        };
        let client_final = String::from_utf8(response.data.to_vec()).unwrap();
        let (without_proof, proof) = client_final.rsplit_once(",p=").expect("client proof");

        let salted = hi(password.as_bytes(), MOCK_SALT, MOCK_ITERATIONS);
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let client_sig = hmac(&stored_key, auth_message.as_bytes());
        let mut expected_proof = client_key;
        for (p, s) in expected_proof.iter_mut().zip(client_sig) {
            *p ^= s;
        }
        assert_eq!(proof, BASE64.encode(expected_proof), "client proof mismatch");

        let server_key = hmac(&salted, b"Server Key");
        let server_sig = hmac(&server_key, auth_message.as_bytes());
        let mut tail = vec![
            ServerMessage::Authentication(Authentication::SaslFinal {
                data: Bytes::from(format!("v={}", BASE64.encode(server_sig))),
            }),
            ServerMessage::Authentication(Authentication::Ok),
            ServerMessage::ServerKeyData(ServerKeyData { data: [7u8; 32] }),
        ];
        for (name, value) in params {
            tail.push(ServerMessage::ParameterStatus(ParameterStatus {
                proto: self.proto.clone(),
                name: Bytes::copy_from_slice(name.as_bytes()),
                value: Bytes::copy_from_slice(value),
            }));
        }
        tail.push(ready());
        self.send(&tail).await;
    }

    /// Serves one full query pipeline according to the script.
    pub async fn serve_query(&mut self, script: QueryScript) {
        let Some(ClientMessage::Prepare(_)) = self.try_recv().await else {
            panic!("expected Prepare");
        };
        self.send(&[
            ServerMessage::PrepareComplete(edgedb_protocol::server_message::PrepareComplete {
                headers: KeyValues::new(),
                cardinality: Cardinality::Many,
                input_typedesc_id: script.input_id,
                output_typedesc_id: script.output_id,
            }),
            ready(),
        ])
        .await;

        if let Some((input, output)) = script.describe {
            let Some(ClientMessage::DescribeStatement(_)) = self.try_recv().await else {
                panic!("expected DescribeStatement");
            };
            self.send(&[
                ServerMessage::CommandDataDescription(CommandDataDescription {
                    headers: KeyValues::new(),
                    result_cardinality: Cardinality::Many,
                    input: RawTypedesc {
                        proto: self.proto.clone(),
                        id: script.input_id,
                        data: input,
                    },
                    output: RawTypedesc {
                        proto: self.proto.clone(),
                        id: script.output_id,
                        data: output,
                    },
                }),
                ready(),
            ])
            .await;
        }

        let Some(ClientMessage::Execute(execute)) = self.try_recv().await else {
            panic!("expected Execute");
        };
        if let Some(expected) = &script.expect_arguments {
            assert_eq!(&execute.arguments, expected, "argument blob mismatch");
        }
        match script.result {
            Ok(rows) => {
                self.send(&[
                    ServerMessage::Data(Data { data: rows }),
                    command_complete(),
                    ready(),
                ])
                .await;
            }
            Err((code, message)) => {
                self.send(&[
                    ServerMessage::ErrorResponse(ErrorResponse {
                        severity: ErrorSeverity::Error,
                        code,
                        message,
                        attributes: KeyValues::new(),
                    }),
                    ready(),
                ])
                .await;
            }
        }
    }

    /// Rejects the next pipeline at the prepare stage.
    pub async fn serve_prepare_error(&mut self, code: u32, message: &str) {
        let Some(ClientMessage::Prepare(_)) = self.try_recv().await else {
            panic!("expected Prepare");
        };
        self.send(&[
            ServerMessage::ErrorResponse(ErrorResponse {
                severity: ErrorSeverity::Error,
                code,
                message: message.into(),
                attributes: KeyValues::new(),
            }),
            ready(),
        ])
        .await;
    }

    /// Serves query pipelines until the client goes away, asking the
    /// handler what to answer for each query text.
    pub async fn serve(&mut self, mut handler: impl FnMut(&str) -> QueryScript) {
        loop {
            let Some(msg) = self.try_recv().await else {
                return;
            };
            let prepare = match msg {
                ClientMessage::Prepare(prepare) => prepare,
                ClientMessage::Terminate => return,
                msg => panic!("expected Prepare, got {msg:?}"),
            };
            let script = handler(&prepare.command_text);
            self.send(&[
                ServerMessage::PrepareComplete(
                    edgedb_protocol::server_message::PrepareComplete {
                        headers: KeyValues::new(),
                        cardinality: Cardinality::Many,
                        input_typedesc_id: script.input_id,
                        output_typedesc_id: script.output_id,
                    },
                ),
                ready(),
            ])
            .await;
            let Some(ClientMessage::Execute(_)) = self.try_recv().await else {
                return;
            };
            match script.result {
                Ok(rows) => {
                    self.send(&[
                        ServerMessage::Data(Data { data: rows }),
                        command_complete(),
                        ready(),
                    ])
                    .await;
                }
                Err((code, message)) => {
                    self.send(&[
                        ServerMessage::ErrorResponse(ErrorResponse {
                            severity: ErrorSeverity::Error,
                            code,
                            message,
                            attributes: KeyValues::new(),
                        }),
                        ready(),
                    ])
                    .await;
                }
            }
        }
    }

    pub async fn send_dump_packets(&mut self, header: &[u8], blocks: &[&[u8]]) {
        let mut messages = vec![ServerMessage::DumpHeader(RawPacket {
            data: Bytes::copy_from_slice(header),
        })];
        for block in blocks {
            messages.push(ServerMessage::DumpBlock(RawPacket {
                data: Bytes::copy_from_slice(block),
            }));
        }
        messages.push(command_complete());
        messages.push(ready());
        self.send(&messages).await;
    }
}
