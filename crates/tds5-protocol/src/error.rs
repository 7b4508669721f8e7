//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS 5.0 data.
///
/// Every variant is a protocol fault: a session that observes one of these
/// on the wire can no longer trust its byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Fewer bytes than a fixed-size structure requires.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The buffer ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown packet buffer type.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Declared packet length is outside the legal range.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// Unknown or unsupported token tag.
    #[error("unknown token type: 0x{0:02X}")]
    UnknownToken(u8),

    /// Datatype byte this implementation does not support.
    #[error("unsupported data type: 0x{0:02X}")]
    UnsupportedDataType(u8),

    /// A data token arrived without the format token that describes it.
    #[error("{0} token received without a preceding format token")]
    MissingFormat(&'static str),

    /// A length-prefixed token's content does not match its declared length.
    #[error("length mismatch in {token}: declared {declared} bytes, content needs {needed}")]
    LengthMismatch {
        /// Token name.
        token: &'static str,
        /// Length declared by the prefix.
        declared: usize,
        /// Length the content actually required, when known.
        needed: usize,
    },

    /// A field holds a value outside its defined domain.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: u32,
    },

    /// A decoded or encoded value does not fit its target representation.
    #[error("value out of range for {0}")]
    ValueOutOfRange(&'static str),

    /// A value cannot be written with the given column format.
    #[error("value of kind {value} cannot be written as {data_type}")]
    TypeMismatch {
        /// Kind of the value offered.
        value: &'static str,
        /// Datatype requested by the format.
        data_type: &'static str,
    },

    /// A message ended in the middle of a token.
    #[error("message ended with {0} bytes of an incomplete token")]
    TrailingBytes(usize),

    /// Text could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(&'static str),
}
