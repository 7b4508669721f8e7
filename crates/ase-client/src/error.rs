//! Client error types.

use std::fmt;

use tds5_protocol::ServerMessage;
use thiserror::Error;

/// Errors that can occur during session operations.
///
/// The variants fall into four groups. Transport faults (`Io`,
/// `Connection`, `ConnectTimeout`, `ConnectionClosed`, `Tls`) and protocol
/// faults (`Protocol`, `Codec`) leave the session doomed. Database errors
/// carry the server's records and leave the session usable unless one of
/// them was fatal. Cancellation is reported on its own.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connecting or logging in took longer than `LoginTimeout`.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error.
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] ase_tls::TlsError),

    /// Malformed token or packet data.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds5_protocol::ProtocolError),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] ase_codec::CodecError),

    /// The server reported one or more errors.
    #[error("{0}")]
    Database(DatabaseErrors),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server asked for something this client does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The session hit an earlier fatal fault and cannot be used.
    #[error("session is doomed by an earlier fault")]
    SessionDoomed,
}

impl Error {
    /// Check if this error came from the network or TLS layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ConnectTimeout | Self::ConnectionClosed | Self::Io(_) => {
                true
            }
            #[cfg(feature = "tls")]
            Self::Tls(_) => true,
            Self::Codec(e) => e.is_io(),
            _ => false,
        }
    }

    /// Check if this error indicates corrupt or unexpected protocol data.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        match self {
            Self::Protocol(_) => true,
            Self::Codec(e) => !e.is_io(),
            _ => false,
        }
    }

    /// Check if this error reports a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the server raised error `number`.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        match self {
            Self::Database(errors) => errors.iter().any(|e| e.number == number),
            _ => false,
        }
    }

    /// Highest severity among the server's error records.
    #[must_use]
    pub fn severity(&self) -> Option<u8> {
        match self {
            Self::Database(errors) => errors.max_severity(),
            _ => None,
        }
    }

    /// Whether the fault makes the session unusable.
    #[must_use]
    pub fn dooms_session(&self) -> bool {
        match self {
            Self::Database(errors) => errors.is_fatal(),
            Self::Cancelled | Self::Config(_) => false,
            _ => true,
        }
    }
}

/// Server error records collected over one response, in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseErrors {
    errors: Vec<ServerMessage>,
}

impl DatabaseErrors {
    /// Wrap a non-empty list of records.
    #[must_use]
    pub fn new(errors: Vec<ServerMessage>) -> Self {
        Self { errors }
    }

    /// The first record, which usually names the root cause.
    #[must_use]
    pub fn first(&self) -> Option<&ServerMessage> {
        self.errors.first()
    }

    /// Iterate over the records in server order.
    pub fn iter(&self) -> std::slice::Iter<'_, ServerMessage> {
        self.errors.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Highest severity among the records.
    #[must_use]
    pub fn max_severity(&self) -> Option<u8> {
        self.errors.iter().map(|e| e.severity).max()
    }

    /// Whether any record is fatal to the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.errors.iter().any(ServerMessage::is_fatal)
    }

    /// Consume into the underlying records.
    #[must_use]
    pub fn into_inner(self) -> Vec<ServerMessage> {
        self.errors
    }
}

impl fmt::Display for DatabaseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.first() {
            Some(first) => {
                write!(
                    f,
                    "server error {} (severity {}, state {}): {}",
                    first.number,
                    first.severity,
                    first.state,
                    first.text.trim_end()
                )?;
                if self.errors.len() > 1 {
                    write!(f, " (+{} more)", self.errors.len() - 1)?;
                }
                Ok(())
            }
            None => f.write_str("server error"),
        }
    }
}

impl<'a> IntoIterator for &'a DatabaseErrors {
    type Item = &'a ServerMessage;
    type IntoIter = std::slice::Iter<'a, ServerMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: i32, severity: u8) -> ServerMessage {
        ServerMessage {
            number,
            severity,
            text: format!("message {number}\n"),
            ..ServerMessage::default()
        }
    }

    #[test]
    fn test_database_errors_display() {
        let errors = DatabaseErrors::new(vec![record(4002, 14), record(4001, 11)]);
        assert_eq!(
            errors.to_string(),
            "server error 4002 (severity 14, state 0): message 4002 (+1 more)"
        );
    }

    #[test]
    fn test_predicates() {
        let err = Error::Database(DatabaseErrors::new(vec![record(208, 16), record(3621, 10)]));
        assert!(err.is_server_error(208));
        assert!(err.is_server_error(3621));
        assert!(!err.is_server_error(1));
        assert_eq!(err.severity(), Some(16));
        assert!(!err.is_transport());
        assert!(!err.is_protocol_error());
        assert!(!err.dooms_session());

        let fatal = Error::Database(DatabaseErrors::new(vec![record(605, 21)]));
        assert!(fatal.dooms_session());
    }

    #[test]
    fn test_fault_classes() {
        let closed = Error::Codec(ase_codec::CodecError::ConnectionClosed);
        assert!(closed.is_transport());
        assert!(!closed.is_protocol_error());

        let bad = Error::Codec(ase_codec::CodecError::InvalidHeader);
        assert!(bad.is_protocol_error());
        assert!(bad.dooms_session());

        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.dooms_session());
        assert!(Error::ConnectTimeout.is_transport());
    }
}
