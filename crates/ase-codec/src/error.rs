//! Codec error types.

use thiserror::Error;

/// Errors raised by the framing layer.
///
/// All of them leave the byte stream in an unknown position; the owning
/// session must be doomed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Underlying IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed packet or token data.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds5_protocol::ProtocolError),

    /// A packet declared a length above the negotiated maximum.
    #[error("packet too large: {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Declared size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A packet declared a length below the header size.
    #[error("invalid packet header")]
    InvalidHeader,

    /// The stream ended partway through a packet.
    #[error("stream ended with {0} bytes of an incomplete packet")]
    TruncatedPacket(usize),

    /// The peer closed the connection in the middle of a message.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Check whether this error came from the transport rather than the data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}
