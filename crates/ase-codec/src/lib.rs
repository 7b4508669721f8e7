//! # ase-codec
//!
//! Async framing layer for TDS 5.0 packet handling.
//!
//! This crate turns raw byte streams into TDS packets and messages, handling
//! packet reassembly across TCP segment boundaries and fragmentation of
//! outgoing messages at the negotiated packet size.
//!
//! ## Architecture
//!
//! ```text
//! TCP/TLS stream → PacketCodec (packet framing) → MessageAssembler → session
//! ```
//!
//! ### Attention
//!
//! The connection splits its transport into read and write halves. An
//! [`AttentionHandle`] shares the write half, so a cancel request can be
//! written while the owning task is blocked reading a large result set.
//!
//! ```rust,ignore
//! use ase_codec::Connection;
//!
//! let conn = Connection::new(tcp_stream);
//! let attention = conn.attention_handle();
//!
//! tokio::spawn(async move {
//!     attention.send().await?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{AttentionHandle, Connection};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, PacketCodec};
