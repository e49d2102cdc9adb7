use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::engine::{Column, Row};
use crate::error::{GateError, Result};
use super::protocol::*;

// MySQL Packet structure
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: Bytes) -> Self {
        Self { sequence_id, payload }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());

        // Payload length (3 bytes)
        buf.put_uint_le(self.payload.len() as u64, 3);

        // Sequence ID
        buf.put_u8(self.sequence_id);

        buf.put_slice(&self.payload);

        buf
    }

    /// Decodes one packet from the front of `buf`, or returns `None` if it is
    /// not complete yet.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let len = (buf[0] as usize) | ((buf[1] as usize) << 8) | ((buf[2] as usize) << 16);
        let sequence_id = buf[3];

        if buf.len() < 4 + len {
            return Ok(None);
        }

        buf.advance(4);
        let payload = buf.split_to(len).freeze();

        Ok(Some(Packet { sequence_id, payload }))
    }
}

// Handshake packet (Initial handshake from server to client)
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn new(connection_id: u32, server_version: &str) -> Self {
        // Credentials are not verified, so the scramble only has to be well formed
        let auth_plugin_data: Vec<u8> = (0..20).map(|i| (i * 7 + 13) as u8).collect();

        Self {
            protocol_version: 10,
            server_version: server_version.to_string(),
            connection_id,
            auth_plugin_data,
            capability_flags: server_capabilities(),
            character_set: UTF8_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(self.protocol_version);
        write_null_terminated_str(&mut buf, &self.server_version);
        buf.put_u32_le(self.connection_id);

        // Auth plugin data part 1 (8 bytes) + filler
        buf.put_slice(&self.auth_plugin_data[0..8]);
        buf.put_u8(0);

        // Capability flags (lower 2 bytes)
        buf.put_u16_le((self.capability_flags & 0xffff) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        // Capability flags (upper 2 bytes)
        buf.put_u16_le(((self.capability_flags >> 16) & 0xffff) as u16);

        buf.put_u8(self.auth_plugin_data.len() as u8 + 1);
        buf.put_bytes(0, 10);

        // Auth plugin data part 2 (12 bytes) + terminator
        buf.put_slice(&self.auth_plugin_data[8..20]);
        buf.put_u8(0);

        write_null_terminated_str(&mut buf, &self.auth_plugin_name);

        buf.freeze()
    }
}

// Handshake Response (from client)
#[derive(Debug)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponse {
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.len() < 32 {
            return Err(GateError::InvalidPacket("Handshake response too short".to_string()));
        }

        let capability_flags = payload.get_u32_le();
        let max_packet_size = payload.get_u32_le();
        let character_set = payload.get_u8();

        // Reserved
        payload.advance(23);

        let username = read_null_terminated_string(&mut payload)
            .ok_or_else(|| GateError::InvalidPacket("Invalid username".to_string()))?;

        let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            let len = read_lenenc_int(&mut payload)
                .ok_or_else(|| GateError::InvalidPacket("Invalid auth response length".to_string()))? as usize;
            if payload.remaining() < len {
                return Err(GateError::InvalidPacket("Auth response too short".to_string()));
            }
            payload.copy_to_bytes(len).to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            if !payload.has_remaining() {
                return Err(GateError::InvalidPacket("Missing auth response".to_string()));
            }
            let len = payload.get_u8() as usize;
            if payload.remaining() < len {
                return Err(GateError::InvalidPacket("Auth response too short".to_string()));
            }
            payload.copy_to_bytes(len).to_vec()
        } else {
            read_null_terminated_string(&mut payload)
                .ok_or_else(|| GateError::InvalidPacket("Invalid auth response".to_string()))?
                .into_bytes()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            read_null_terminated_string(&mut payload).filter(|db| !db.is_empty())
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            read_null_terminated_string(&mut payload)
        } else {
            None
        };

        Ok(Self {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }
}

// OK Packet
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn new() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }

    pub fn with_affected_rows(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::new()
        }
    }

    pub fn encode(&self) -> Bytes {
        self.encode_with_header(0x00)
    }

    // OK packet with 0xFE header, sent in place of EOF when CLIENT_DEPRECATE_EOF is set
    pub fn encode_as_eof(&self) -> Bytes {
        self.encode_with_header(0xfe)
    }

    fn encode_with_header(&self, header: u8) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(header);
        write_lenenc_int(&mut buf, self.affected_rows);
        write_lenenc_int(&mut buf, self.last_insert_id);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(self.warnings);

        if !self.info.is_empty() {
            buf.put_slice(self.info.as_bytes());
        }

        buf.freeze()
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new()
    }
}

// Error Packet
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, error_message: String) -> Self {
        Self {
            error_code,
            sql_state: "HY000".to_string(),
            error_message,
        }
    }

    pub fn from_error(err: &GateError) -> Self {
        let mut packet = Self::new(err.mysql_code(), err.to_string());
        if let GateError::MalformedCommand(_) = err {
            packet.sql_state = "42000".to_string();
        } else if let GateError::QueryInterrupted = err {
            packet.sql_state = "70100".to_string();
        }
        packet
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(0xff);
        buf.put_u16_le(self.error_code);
        buf.put_u8(b'#'); // SQL state marker
        buf.put_slice(self.sql_state.as_bytes());
        buf.put_slice(self.error_message.as_bytes());

        buf.freeze()
    }
}

// EOF Packet
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn new() -> Self {
        Self {
            warnings: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(0xfe);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status_flags);

        buf.freeze()
    }
}

impl Default for EofPacket {
    fn default() -> Self {
        Self::new()
    }
}

// Column Definition (protocol 4.1)
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn new(name: String, column_type: ColumnType) -> Self {
        let character_set = if matches!(column_type, ColumnType::VarString | ColumnType::VarChar) {
            UTF8_GENERAL_CI as u16
        } else {
            BINARY_CHARSET
        };

        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.clone(),
            org_name: name,
            character_set,
            column_length: 255,
            column_type: column_type as u8,
            flags: 0,
            decimals: 0,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        write_lenenc_str(&mut buf, &self.catalog);
        write_lenenc_str(&mut buf, &self.schema);
        write_lenenc_str(&mut buf, &self.table);
        write_lenenc_str(&mut buf, &self.org_table);
        write_lenenc_str(&mut buf, &self.name);
        write_lenenc_str(&mut buf, &self.org_name);

        // Length of fixed-length fields
        write_lenenc_int(&mut buf, 0x0c);

        buf.put_u16_le(self.character_set);
        buf.put_u32_le(self.column_length);
        buf.put_u8(self.column_type);
        buf.put_u16_le(self.flags);
        buf.put_u8(self.decimals);

        // Filler
        buf.put_u16(0);

        buf.freeze()
    }
}

impl From<&Column> for ColumnDefinition {
    fn from(column: &Column) -> Self {
        ColumnDefinition::new(column.name.clone(), ColumnType::from(column.kind))
    }
}

// Text-protocol result row
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub values: Vec<Option<String>>,
}

impl ResultRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for value in &self.values {
            match value {
                Some(v) => write_lenenc_str(&mut buf, v),
                None => buf.put_u8(0xfb), // NULL
            }
        }

        buf.freeze()
    }
}

impl From<&Row> for ResultRow {
    fn from(row: &Row) -> Self {
        ResultRow::new(row.values.iter().map(|v| v.to_text()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ColumnKind, Value};

    #[test]
    fn packet_round_trips_through_buffer() {
        let packet = Packet::new(3, Bytes::from_static(b"\x03SELECT 1"));
        let mut buf = packet.encode();
        assert_eq!(&buf[..4], &[10, 0, 0, 3]);

        let decoded = Packet::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.sequence_id, 3);
        assert_eq!(&decoded.payload[..], b"\x03SELECT 1");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_packet_waits_for_more_bytes() {
        let mut buf = BytesMut::from(&[5u8, 0, 0, 0, b'a', b'b'][..]);
        assert!(Packet::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn handshake_carries_connection_id() {
        let payload = HandshakePacket::new(0x01020304, "5.7.99-querygate").encode();
        assert_eq!(payload[0], 10);

        let version_end = payload.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&payload[1..version_end], b"5.7.99-querygate");
        assert_eq!(&payload[version_end + 1..version_end + 5], &[4, 3, 2, 1]);
    }

    #[test]
    fn handshake_response_reads_user_and_database() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_CONNECT_WITH_DB);
        buf.put_u32_le(16 * 1024 * 1024);
        buf.put_u8(UTF8MB4_GENERAL_CI);
        buf.put_bytes(0, 23);
        write_null_terminated_str(&mut buf, "analyst");
        buf.put_u8(0);
        write_null_terminated_str(&mut buf, "sales");

        let response = HandshakeResponse::decode(buf.freeze()).unwrap();
        assert_eq!(response.username, "analyst");
        assert_eq!(response.database.as_deref(), Some("sales"));
        assert!(response.auth_response.is_empty());
    }

    #[test]
    fn truncated_handshake_response_is_rejected() {
        let result = HandshakeResponse::decode(Bytes::from_static(&[0u8; 8]));
        assert!(matches!(result, Err(GateError::InvalidPacket(_))));
    }

    #[test]
    fn ok_packet_layout() {
        let ok = OkPacket::with_affected_rows(3);
        assert_eq!(&ok.encode()[..], &[0x00, 3, 0, 0x02, 0x00, 0, 0]);
        assert_eq!(ok.encode_as_eof()[0], 0xfe);
    }

    #[test]
    fn err_packet_uses_error_code_and_state() {
        let err = ErrPacket::from_error(&GateError::ConnectionNotFound(7)).encode();
        assert_eq!(err[0], 0xff);
        assert_eq!(u16::from_le_bytes([err[1], err[2]]), 1094);
        assert_eq!(&err[3..9], b"#HY000");
        assert_eq!(&err[9..], b"Connection not found: 7");
    }

    #[test]
    fn rows_encode_nulls_and_text() {
        let row = Row::new(vec![Value::Int(42), Value::Null, Value::from("x")]);
        let encoded = ResultRow::from(&row).encode();
        assert_eq!(&encoded[..], &[2, b'4', b'2', 0xfb, 1, b'x']);
    }

    #[test]
    fn column_definition_from_schema_column() {
        let def = ColumnDefinition::from(&Column::new("n", ColumnKind::Int64));
        assert_eq!(def.column_type, ColumnType::LongLong as u8);
        assert_eq!(def.character_set, BINARY_CHARSET);

        let text = ColumnDefinition::from(&Column::new("s", ColumnKind::Text));
        assert_eq!(text.character_set, UTF8_GENERAL_CI as u16);
    }
}
