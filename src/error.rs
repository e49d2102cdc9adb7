use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(u32),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Query execution error: {0}")]
    EngineExecution(String),

    #[error("Query execution was interrupted")]
    QueryInterrupted,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// MySQL error code reported in the ERR packet for this error.
    pub fn mysql_code(&self) -> u16 {
        match self {
            GateError::ConnectionNotFound(_) => 1094, // ER_NO_SUCH_THREAD
            GateError::MalformedCommand(_) => 1064,   // ER_PARSE_ERROR
            GateError::QueryInterrupted => 1317,      // ER_QUERY_INTERRUPTED
            GateError::InvalidPacket(_) => 1047,      // ER_UNKNOWN_COM_ERROR
            GateError::EngineExecution(_)
            | GateError::Transport(_)
            | GateError::ConnectionClosed
            | GateError::Config(_) => 1105, // ER_UNKNOWN_ERROR
        }
    }

    /// Whether the connection can keep serving commands after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::Transport(_) | GateError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_errors_map_to_mysql_codes() {
        assert_eq!(GateError::ConnectionNotFound(7).mysql_code(), 1094);
        assert_eq!(GateError::MalformedCommand("kill abc".into()).mysql_code(), 1064);
        assert_eq!(GateError::QueryInterrupted.mysql_code(), 1317);
    }

    #[test]
    fn only_transport_failures_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(GateError::from(io).is_fatal());
        assert!(GateError::ConnectionClosed.is_fatal());
        assert!(!GateError::EngineExecution("boom".into()).is_fatal());
        assert!(!GateError::ConnectionNotFound(1).is_fatal());
    }

    #[test]
    fn display_includes_connection_id() {
        assert_eq!(
            GateError::ConnectionNotFound(42).to_string(),
            "Connection not found: 42"
        );
    }
}
