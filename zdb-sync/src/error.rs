use crate::position::Position;
use thiserror::Error;

/// Failure of a single command against one store endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Segment end reached (`-EOF` reply)
    #[error("EOF")]
    Eof,

    /// Connection refused, dropped, timed out or otherwise unusable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Store replied with an error
    #[error("Server error: {0}")]
    Server(String),

    /// Reply did not have the shape the command decoder expects
    #[error("Unexpected reply to {command}: {reason}")]
    UnexpectedReply {
        command: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Eof)
    }

    /// Transport failures can be recovered by reconnecting
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::Transport(_))
    }

    pub(crate) fn unexpected(command: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::UnexpectedReply {
            command,
            reason: reason.into(),
        }
    }
}

impl From<redis::RedisError> for ProtocolError {
    fn from(err: redis::RedisError) -> Self {
        if err.code() == Some("EOF") {
            return ProtocolError::Eof;
        }

        if err.is_io_error()
            || err.kind() == redis::ErrorKind::IoError
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            return ProtocolError::Transport(err.to_string());
        }

        ProtocolError::Server(err.to_string())
    }
}

/// Session-level error types
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The slave did not acknowledge an applied record the way it must
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Replication cursors are in an impossible state
    #[error("Invariant violation: {reason} (master {master}, slave {slave})")]
    InvariantViolation {
        master: Position,
        slave: Position,
        reason: &'static str,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Giving up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ProtocolError },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn is_eof(&self) -> bool {
        matches!(self, SyncError::Protocol(e) if e.is_eof())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Protocol(e) if e.is_transient())
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
