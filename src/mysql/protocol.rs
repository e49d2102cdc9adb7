use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::engine::ColumnKind;

// MySQL Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb,
    Query,
    FieldList,
    ProcessKill,
    Ping,
    StmtPrepare,
    StmtExecute,
    StmtClose,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x0c => Command::ProcessKill,
            0x0e => Command::Ping,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x19 => Command::StmtClose,
            b => Command::Unknown(b),
        }
    }
}

// MySQL Capability Flags
pub const CLIENT_LONG_PASSWORD: u32 = 0x00000001;
pub const CLIENT_FOUND_ROWS: u32 = 0x00000002;
pub const CLIENT_LONG_FLAG: u32 = 0x00000004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x00000008;
pub const CLIENT_PROTOCOL_41: u32 = 0x00000200;
pub const CLIENT_INTERACTIVE: u32 = 0x00000400;
pub const CLIENT_TRANSACTIONS: u32 = 0x00002000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x00008000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x00020000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x00080000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x00200000;
pub const CLIENT_DEPRECATE_EOF: u32 = 0x01000000;

pub fn server_capabilities() -> u32 {
    CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_INTERACTIVE
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF
}

// Character sets
pub const UTF8_GENERAL_CI: u8 = 33;
pub const UTF8MB4_GENERAL_CI: u8 = 45;
pub const BINARY_CHARSET: u16 = 63;

// Status flags
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

/// Largest payload carried by a single packet.
pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;

// Column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Date = 0x0a,
    DateTime = 0x0c,
    VarChar = 0x0f,
    NewDecimal = 0xf6,
    Blob = 0xfc,
    VarString = 0xfd,
}

impl From<ColumnKind> for ColumnType {
    fn from(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Boolean | ColumnKind::Int8 => ColumnType::Tiny,
            ColumnKind::Int16 => ColumnType::Short,
            ColumnKind::Int32 => ColumnType::Long,
            ColumnKind::Int64 => ColumnType::LongLong,
            ColumnKind::Float32 => ColumnType::Float,
            ColumnKind::Float64 => ColumnType::Double,
            ColumnKind::Decimal => ColumnType::NewDecimal,
            ColumnKind::Text => ColumnType::VarString,
            ColumnKind::Date => ColumnType::Date,
            ColumnKind::DateTime => ColumnType::DateTime,
            ColumnKind::Timestamp => ColumnType::Timestamp,
            ColumnKind::Blob => ColumnType::Blob,
            ColumnKind::Null => ColumnType::Null,
        }
    }
}

impl ColumnType {
    pub fn is_binary(&self) -> bool {
        matches!(self, ColumnType::Blob)
    }
}

// Helper functions for length-encoded integers
pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < 16777216 {
        buf.put_u8(0xfd);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn write_lenenc_str(buf: &mut BytesMut, s: &str) {
    write_lenenc_int(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

pub fn write_null_terminated_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn read_lenenc_int(buf: &mut Bytes) -> Option<u64> {
    if buf.is_empty() {
        return None;
    }

    let first = buf.get_u8();
    match first {
        0xfb => Some(0), // NULL
        0xfc => {
            if buf.remaining() < 2 {
                return None;
            }
            Some(buf.get_u16_le() as u64)
        }
        0xfd => {
            if buf.remaining() < 3 {
                return None;
            }
            Some(buf.get_uint_le(3))
        }
        0xfe => {
            if buf.remaining() < 8 {
                return None;
            }
            Some(buf.get_u64_le())
        }
        _ => Some(first as u64),
    }
}

pub fn read_lenenc_str(buf: &mut Bytes) -> Option<String> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.remaining() < len {
        return None;
    }
    let bytes = buf.copy_to_bytes(len);
    Some(String::from_utf8_lossy(&bytes).to_string())
}

pub fn read_null_terminated_string(buf: &mut Bytes) -> Option<String> {
    let mut result = Vec::new();
    while buf.has_remaining() {
        let byte = buf.get_u8();
        if byte == 0 {
            return String::from_utf8(result).ok();
        }
        result.push(byte);
    }
    None
}

pub fn read_string_to_end(buf: &mut Bytes) -> String {
    let bytes = buf.copy_to_bytes(buf.remaining());
    String::from_utf8_lossy(&bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_int_boundaries() {
        for (value, encoded_len) in [(0u64, 1), (250, 1), (251, 3), (65535, 3), (65536, 4), (16777216, 9)] {
            let mut buf = BytesMut::new();
            write_lenenc_int(&mut buf, value);
            assert_eq!(buf.len(), encoded_len, "value {value}");

            let mut bytes = buf.freeze();
            assert_eq!(read_lenenc_int(&mut bytes), Some(value));
        }
    }

    #[test]
    fn command_bytes() {
        assert_eq!(Command::from(0x03), Command::Query);
        assert_eq!(Command::from(0x0c), Command::ProcessKill);
        assert_eq!(Command::from(0x42), Command::Unknown(0x42));
    }

    #[test]
    fn column_kinds_map_to_wire_types() {
        assert_eq!(ColumnType::from(ColumnKind::Int32) as u8, 0x03);
        assert_eq!(ColumnType::from(ColumnKind::Int64) as u8, 0x08);
        assert_eq!(ColumnType::from(ColumnKind::Text) as u8, 0xfd);
        assert_eq!(ColumnType::from(ColumnKind::Decimal) as u8, 0xf6);
    }

    #[test]
    fn null_terminated_string_requires_terminator() {
        let mut bytes = Bytes::from_static(b"root\0rest");
        assert_eq!(read_null_terminated_string(&mut bytes).as_deref(), Some("root"));
        assert_eq!(read_string_to_end(&mut bytes), "rest");

        let mut unterminated = Bytes::from_static(b"root");
        assert_eq!(read_null_terminated_string(&mut unterminated), None);
    }
}
