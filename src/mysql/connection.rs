use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::error::{GateError, Result};
use crate::query::{ConnectionHandle, Handler, KillTarget, ResultBatch, ResultSink};
use super::packet::*;
use super::protocol::*;

/// Framed packet I/O over one client socket.
///
/// Outgoing packets are queued and written on [`flush`](PacketIo::flush), so a
/// whole result batch goes out in a single write.
struct PacketIo {
    stream: TcpStream,
    sequence_id: u8,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl PacketIo {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            sequence_id: 0,
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
        }
    }

    async fn read_frame(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.read_buffer)? {
                self.sequence_id = packet.sequence_id.wrapping_add(1);
                return Ok(packet);
            }

            let mut buf = vec![0u8; 8192];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                return Err(GateError::ConnectionClosed);
            }

            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }

    /// Reads one logical packet, joining payloads split at the 16MB boundary.
    async fn read_packet(&mut self) -> Result<Packet> {
        let first = self.read_frame().await?;
        if first.payload.len() < MAX_PAYLOAD_LEN {
            return Ok(first);
        }

        let mut payload = BytesMut::from(&first.payload[..]);
        loop {
            let next = self.read_frame().await?;
            payload.extend_from_slice(&next.payload);
            if next.payload.len() < MAX_PAYLOAD_LEN {
                break;
            }
        }

        Ok(Packet::new(first.sequence_id, payload.freeze()))
    }

    fn queue(&mut self, mut payload: Bytes) {
        loop {
            let chunk = payload.split_to(payload.len().min(MAX_PAYLOAD_LEN));
            let full = chunk.len() == MAX_PAYLOAD_LEN;

            let packet = Packet::new(self.sequence_id, chunk);
            self.write_buffer.extend_from_slice(&packet.encode());
            self.sequence_id = self.sequence_id.wrapping_add(1);

            // A payload of exactly N * 16MB is terminated by an empty packet
            if !full {
                break;
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.write_buffer.is_empty() {
            let pending = self.write_buffer.split();
            self.stream.write_all(&pending).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn write_payload(&mut self, payload: Bytes) -> Result<()> {
        self.queue(payload);
        self.flush().await
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Adapts pushed result batches to the text result set protocol.
///
/// The first batch carrying columns emits the column count and definitions;
/// every batch then emits its rows and is flushed. Batches without columns
/// are acknowledgements and only contribute to the affected row count of the
/// final OK packet.
struct ResultSetWriter<'a> {
    io: &'a mut PacketIo,
    deprecate_eof: bool,
    columns_sent: bool,
    rows_affected: u64,
}

impl<'a> ResultSetWriter<'a> {
    fn new(io: &'a mut PacketIo, deprecate_eof: bool) -> Self {
        Self {
            io,
            deprecate_eof,
            columns_sent: false,
            rows_affected: 0,
        }
    }

    fn queue_columns(&mut self, batch: &ResultBatch) {
        let mut count = BytesMut::new();
        write_lenenc_int(&mut count, batch.schema().len() as u64);
        self.io.queue(count.freeze());

        for column in &batch.schema().columns {
            self.io.queue(ColumnDefinition::from(column).encode());
        }

        if !self.deprecate_eof {
            self.io.queue(EofPacket::new().encode());
        }

        self.columns_sent = true;
    }

    async fn finish(self) -> Result<()> {
        let terminator = if !self.columns_sent {
            OkPacket::with_affected_rows(self.rows_affected).encode()
        } else if self.deprecate_eof {
            OkPacket::new().encode_as_eof()
        } else {
            EofPacket::new().encode()
        };
        self.io.write_payload(terminator).await
    }
}

#[async_trait]
impl<'a> ResultSink for ResultSetWriter<'a> {
    async fn deliver(&mut self, batch: ResultBatch) -> Result<()> {
        if batch.schema().is_empty() {
            self.rows_affected += batch.rows_affected();
            return Ok(());
        }

        if !self.columns_sent {
            self.queue_columns(&batch);
        }

        for row in batch.rows() {
            self.io.queue(ResultRow::from(row).encode());
        }

        self.io.flush().await
    }
}

/// One client session: handshake, then commands until the client quits, the
/// socket fails, or the connection is killed.
pub struct MysqlConnection {
    io: PacketIo,
    conn: ConnectionHandle,
    handler: Arc<Handler>,
    server_version: String,
    client_flags: u32,
}

impl MysqlConnection {
    pub fn new(
        stream: TcpStream,
        connection_id: u32,
        handler: Arc<Handler>,
        server_version: impl Into<String>,
    ) -> Self {
        let mut conn = ConnectionHandle::new(connection_id, "");
        if let Ok(addr) = stream.peer_addr() {
            conn = conn.with_peer_addr(addr);
        }

        Self {
            io: PacketIo::new(stream),
            conn,
            handler,
            server_version: server_version.into(),
            client_flags: 0,
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.conn.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr
    }

    pub async fn handle(mut self) -> Result<()> {
        if let Err(e) = self.handshake().await {
            error!(connection_id = self.conn.id, "Handshake failed: {}", e);
            if !e.is_fatal() {
                let _ = self.send_error(&e).await;
            }
            self.io.shutdown().await;
            return Err(e);
        }

        // Register before the client sees OK, so its id is killable right away
        self.handler.new_connection(&self.conn);

        let result = match self.send_ok().await {
            Ok(()) => self.command_loop().await,
            Err(e) => Err(e),
        };

        self.handler.connection_closed(self.conn.id);
        self.io.shutdown().await;

        result
    }

    async fn handshake(&mut self) -> Result<()> {
        let handshake = HandshakePacket::new(self.conn.id, &self.server_version);
        self.io.sequence_id = 0;
        self.io.write_payload(handshake.encode()).await?;

        let packet = self.io.read_packet().await?;
        let response = HandshakeResponse::decode(packet.payload)?;

        debug!(
            connection_id = self.conn.id,
            user = %response.username,
            db = ?response.database,
            "Handshake response"
        );

        // Credentials are accepted as presented
        self.client_flags = response.capability_flags;
        self.conn.user = response.username;
        self.conn.database = response.database;

        Ok(())
    }

    async fn command_loop(&mut self) -> Result<()> {
        let closer = self.conn.clone();
        let id = self.conn.id;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = closer.closed() => {
                    info!(connection_id = id, "Connection killed");
                    return Ok(());
                }
                outcome = self.handle_command() => outcome,
            };

            match outcome {
                Ok(true) => continue,
                Ok(false) => {
                    info!(connection_id = self.conn.id, "Client disconnected");
                    return Ok(());
                }
                Err(GateError::ConnectionClosed) => {
                    info!(connection_id = self.conn.id, "Client went away");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(connection_id = self.conn.id, "Command failed: {}", e);
                    self.send_error(&e).await?;
                }
            }
        }
    }

    /// Handles one command packet. Returns `Ok(false)` once the client quits.
    async fn handle_command(&mut self) -> Result<bool> {
        let packet = self.io.read_packet().await?;
        let mut payload = packet.payload;

        if payload.is_empty() {
            return Err(GateError::InvalidPacket("Empty command packet".to_string()));
        }

        let command = Command::from(payload.get_u8());
        debug!(connection_id = self.conn.id, ?command, "Command");

        match command {
            Command::Quit => return Ok(false),
            Command::Query => {
                let query = read_string_to_end(&mut payload);
                self.handle_query(&query).await?;
            }
            Command::Ping => {
                self.send_ok().await?;
            }
            Command::InitDb => {
                let db_name = read_string_to_end(&mut payload);
                self.conn.database = Some(db_name.clone());
                self.handler.sessions().set_database(self.conn.id, &db_name);
                info!(connection_id = self.conn.id, "Changed database to: {}", db_name);
                self.send_ok().await?;
            }
            Command::ProcessKill => {
                if payload.remaining() < 4 {
                    return Err(GateError::InvalidPacket("Truncated process kill".to_string()));
                }
                let target = payload.get_u32_le();
                self.handler.kill(KillTarget::Connection(target))?;
                self.send_ok().await?;
            }
            Command::FieldList => {
                // No per-table column metadata: answer with an empty field list
                self.send_eof().await?;
            }
            Command::StmtPrepare | Command::StmtExecute | Command::StmtClose => {
                return Err(GateError::InvalidPacket(
                    "Prepared statements are not supported".to_string(),
                ));
            }
            Command::Unknown(b) => {
                warn!(connection_id = self.conn.id, "Unknown command: 0x{:02x}", b);
                return Err(GateError::InvalidPacket(format!("Unknown command: {}", b)));
            }
        }

        Ok(true)
    }

    async fn handle_query(&mut self, query: &str) -> Result<()> {
        let deprecate_eof = self.deprecate_eof();
        let mut writer = ResultSetWriter::new(&mut self.io, deprecate_eof);

        self.handler.com_query(&self.conn, query, &mut writer).await?;
        writer.finish().await
    }

    fn deprecate_eof(&self) -> bool {
        self.client_flags & CLIENT_DEPRECATE_EOF != 0
    }

    async fn send_ok(&mut self) -> Result<()> {
        self.io.write_payload(OkPacket::new().encode()).await
    }

    async fn send_eof(&mut self) -> Result<()> {
        let payload = if self.deprecate_eof() {
            OkPacket::new().encode_as_eof()
        } else {
            EofPacket::new().encode()
        };
        self.io.write_payload(payload).await
    }

    async fn send_error(&mut self, err: &GateError) -> Result<()> {
        // Drop anything half-queued by the failed command
        self.io.write_buffer.clear();
        self.io.write_payload(ErrPacket::from_error(err).encode()).await
    }
}
