//! Streaming database dumps and restores.
//!
//! The dump file starts with a magic string and a format version,
//! followed by the raw protocol packets, each stored as a `u32` length
//! covering a 20-byte SHA-1 of the payload plus the payload itself.
//! The checksum is verified again when the file is restored.

use std::io;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use edgedb_errors::{
    ClientError, Error, ErrorKind, InvalidArgumentError, ProtocolOutOfOrderError,
};
use edgedb_protocol::client_message::{ClientMessage, Dump, Restore, RestoreBlock};
use edgedb_protocol::encoding::KeyValues;
use edgedb_protocol::server_message::ServerMessage;

use super::Connection;

pub const DUMP_MAGIC: &[u8; 13] = b"\xFFEDGEDB\0DUMP\0";
pub const DUMP_VERSION: u64 = 1;

impl Connection {
    /// Streams a dump of the whole database into `output`.
    pub async fn dump<W>(&mut self, output: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Dump(Dump {
                headers: KeyValues::new(),
            }),
            ClientMessage::Sync,
        ])
        .await?;

        let header = match self.message().await? {
            ServerMessage::DumpHeader(packet) => packet,
            ServerMessage::ErrorResponse(err) => {
                self.expect_ready_or_eos(guard)
                    .await
                    .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                    .ok();
                return Err(err.into());
            }
            msg => {
                return Err(ProtocolOutOfOrderError::with_message(format!(
                    "expected DumpHeader, got {msg:?}"
                )));
            }
        };
        output.write_all(DUMP_MAGIC).await.map_err(io_error)?;
        output.write_u64(DUMP_VERSION).await.map_err(io_error)?;
        write_packet(output, &header.data).await?;

        loop {
            match self.message().await? {
                ServerMessage::DumpBlock(packet) => {
                    write_packet(output, &packet.data).await?;
                }
                ServerMessage::CommandComplete(..) => {
                    self.expect_ready(guard).await?;
                    output.flush().await.map_err(io_error)?;
                    return Ok(());
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                msg => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    /// Feeds a dump produced by [dump](Connection::dump) back into the
    /// server. The database must be checked for emptiness by the
    /// caller beforehand.
    pub async fn restore<R>(&mut self, input: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut magic = [0u8; 13];
        input
            .read_exact(&mut magic)
            .await
            .map_err(|_| InvalidArgumentError::with_message("input is not a database dump"))?;
        if &magic != DUMP_MAGIC {
            return Err(InvalidArgumentError::with_message(
                "input is not a database dump",
            ));
        }
        let version = input.read_u64().await.map_err(io_error)?;
        if version != DUMP_VERSION {
            return Err(InvalidArgumentError::with_message(format!(
                "unsupported dump version {version}"
            )));
        }
        let header = read_packet(input)
            .await?
            .ok_or_else(|| InvalidArgumentError::with_message("dump contains no header"))?;

        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Restore(Restore {
                headers: KeyValues::new(),
                jobs: 1,
                data: header,
            }),
            ClientMessage::Sync,
        ])
        .await?;
        match self.message().await? {
            ServerMessage::RestoreReady(..) => {}
            ServerMessage::ErrorResponse(err) => {
                self.expect_ready_or_eos(guard)
                    .await
                    .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                    .ok();
                return Err(err.into());
            }
            msg => {
                return Err(ProtocolOutOfOrderError::with_message(format!(
                    "expected RestoreReady, got {msg:?}"
                )));
            }
        }

        while let Some(block) = read_packet(input).await? {
            self.send_messages(&[ClientMessage::RestoreBlock(RestoreBlock { data: block })])
                .await?;
        }
        self.send_messages(&[ClientMessage::RestoreEof, ClientMessage::Sync])
            .await?;

        loop {
            match self.message().await? {
                ServerMessage::CommandComplete(..) => {
                    self.expect_ready(guard).await?;
                    return Ok(());
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                msg => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }
}

fn io_error(e: io::Error) -> Error {
    ClientError::with_source(e)
}

async fn write_packet<W>(output: &mut W, data: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let digest: [u8; 20] = Sha1::digest(data).into();
    let len = u32::try_from(data.len() + digest.len())
        .map_err(|_| ClientError::with_message("dump packet is too large"))?;
    output.write_u32(len).await.map_err(io_error)?;
    output.write_all(&digest).await.map_err(io_error)?;
    output.write_all(data).await.map_err(io_error)?;
    Ok(())
}

async fn read_packet<R>(input: &mut R) -> Result<Option<Bytes>, Error>
where
    R: AsyncRead + Unpin,
{
    let len = match input.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e)),
    };
    if len < 20 {
        return Err(InvalidArgumentError::with_message("truncated dump packet"));
    }
    let mut packet = vec![0u8; len];
    input
        .read_exact(&mut packet)
        .await
        .map_err(|_| InvalidArgumentError::with_message("truncated dump packet"))?;
    let digest: [u8; 20] = Sha1::digest(&packet[20..]).into();
    if packet[..20] != digest {
        return Err(InvalidArgumentError::with_message(
            "dump packet checksum mismatch",
        ));
    }
    Ok(Some(Bytes::from(packet).slice(20..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::duplex;

    use edgedb_protocol::codec::CodecRegistry;
    use edgedb_protocol::server_message::RestoreReady;

    use crate::builder::Builder;
    use crate::mock::{command_complete, ready, MockServer};

    #[tokio::test]
    async fn dump_then_restore() {
        let config = Builder::new().password("secret").build().unwrap();
        let registry = CodecRegistry::new();

        // dump out of the "source" server
        let (client_io, server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut mock = MockServer::new(server_io);
            mock.handshake("secret").await;
            let Some(ClientMessage::Dump(_)) = mock.try_recv().await else {
                panic!("expected Dump");
            };
            mock.send_dump_packets(b"HDR", &[b"first", b"second"]).await;
        });
        let mut conn = Connection::handshake(client_io, &config, &registry, None)
            .await
            .unwrap();
        let mut file = Vec::new();
        conn.dump(&mut file).await.unwrap();
        assert!(conn.is_consistent());
        server.await.unwrap();

        assert_eq!(&file[..13], DUMP_MAGIC);

        // restore into the "target" server
        let (client_io, server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut mock = MockServer::new(server_io);
            mock.handshake("secret").await;
            let Some(ClientMessage::Restore(restore)) = mock.try_recv().await else {
                panic!("expected Restore");
            };
            assert_eq!(restore.jobs, 1);
            assert_eq!(&restore.data[..], b"HDR");
            mock.send(&[ServerMessage::RestoreReady(RestoreReady {
                headers: KeyValues::new(),
                jobs: 1,
            })])
            .await;
            let Some(ClientMessage::RestoreBlock(block)) = mock.try_recv().await else {
                panic!("expected first RestoreBlock");
            };
            assert_eq!(&block.data[..], b"first");
            let Some(ClientMessage::RestoreBlock(block)) = mock.try_recv().await else {
                panic!("expected second RestoreBlock");
            };
            assert_eq!(&block.data[..], b"second");
            let Some(ClientMessage::RestoreEof) = mock.try_recv().await else {
                panic!("expected RestoreEOF");
            };
            mock.send(&[command_complete(), ready()]).await;
        });
        let mut conn = Connection::handshake(client_io, &config, &registry, None)
            .await
            .unwrap();
        let mut cursor = io::Cursor::new(file);
        conn.restore(&mut cursor).await.unwrap();
        assert!(conn.is_consistent());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn restore_rejects_garbage() {
        let config = Builder::new().password("secret").build().unwrap();
        let registry = CodecRegistry::new();
        let (client_io, server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut mock = MockServer::new(server_io);
            mock.handshake("secret").await;
            // nothing is ever sent: the input fails validation first
            mock.try_recv().await;
        });
        let mut conn = Connection::handshake(client_io, &config, &registry, None)
            .await
            .unwrap();
        let mut cursor = io::Cursor::new(b"PGDMP not our format".to_vec());
        let err = conn.restore(&mut cursor).await.unwrap_err();
        assert!(err.is::<InvalidArgumentError>());
        drop(conn);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn packet_roundtrip() {
        let mut file = Vec::new();
        write_packet(&mut file, b"first block").await.unwrap();
        write_packet(&mut file, b"second block").await.unwrap();

        let mut cursor = io::Cursor::new(file.clone());
        assert_eq!(
            read_packet(&mut cursor).await.unwrap().as_deref(),
            Some(&b"first block"[..])
        );
        assert_eq!(
            read_packet(&mut cursor).await.unwrap().as_deref(),
            Some(&b"second block"[..])
        );
        assert_eq!(read_packet(&mut cursor).await.unwrap(), None);

        // corrupt one byte of the second packet
        let mut broken = file;
        let last = broken.len() - 20;
        broken[last] ^= 0x01;
        let mut cursor = io::Cursor::new(broken);
        read_packet(&mut cursor).await.unwrap();
        assert!(read_packet(&mut cursor).await.is_err());
    }
}
