//! # tds5-protocol
//!
//! Pure implementation of the TDS 5.0 (Tabular Data Stream) protocol spoken
//! by Sybase/SAP Adaptive Server Enterprise.
//!
//! This crate provides packet structures, the login record, the token codec
//! and value decoding for the datatypes a client core needs.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Decoding is a pure function of
//! the input bytes and an explicit [`TokenContext`] carrying the session byte
//! order, charset and the most recent row/parameter formats.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tds5_protocol::{Done, DoneStatus, Token, TokenContext, TokenParser, TranState};
//!
//! let ctx = TokenContext::default();
//! let mut buf = BytesMut::new();
//! Token::Done(Done::new(DoneStatus::COUNT, TranState::NotInTransaction, 3))
//!     .encode(&mut buf, &ctx)
//!     .unwrap();
//!
//! let mut parser = TokenParser::new(ctx);
//! parser.push(&buf);
//! let token = parser.next_token().unwrap().unwrap();
//! assert!(matches!(token, Token::Done(done) if done.count == 3));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod capability;
pub mod charset;
pub mod codec;
pub mod error;
pub mod format;
pub mod login;
pub mod packet;
pub mod request;
pub mod token;
pub mod types;
pub mod value;

pub use capability::{Capabilities, CapabilityMask};
pub use charset::Charset;
pub use codec::ByteOrder;
pub use error::ProtocolError;
pub use format::{ColumnFormat, ColumnStatus, ParamFormat, RowFormat};
pub use login::{LoginRecord, TDS_VERSION};
pub use packet::{
    BufferType, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE,
    PacketHeader, PacketStatus, fragment, reassemble,
};
pub use request::{LanguageRequest, RpcParam, RpcRequest};
pub use token::{
    DbRpc, Done, DoneStatus, EnvChange, EnvChangeType, Language, LoginAck, LoginStatus, Msg,
    OptionCmd, Row, ServerMessage, Token, TokenContext, TokenParser, TokenType, TranState,
};
pub use types::{DataType, LengthKind};
pub use value::SqlValue;
