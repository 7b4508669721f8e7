//! # ase-client
//!
//! Async sessions against Sybase/SAP Adaptive Server Enterprise over TDS 5.0.
//!
//! A [`Session`] is one logged-in connection. It runs one request at a time
//! and streams results lazily through a [`ResultStream`]. Server messages of
//! severity 11 and above are collected over a response and raised together
//! as [`Error::Database`]; lower severities are yielded in stream order and
//! published to [`EventSink::on_info`] subscribers.
//!
//! Sessions are doomed by transport and protocol faults, fatal server errors
//! and unacknowledged attentions. A doomed session refuses further requests
//! and must be discarded.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ase_client::{ConnectionParameters, EventSink, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! let params = Arc::new(ConnectionParameters::parse(
//!     "Data Source=ase01;Port=5000;Database=pubs2;Uid=sa;Pwd=secret",
//! )?);
//! let mut session = Session::connect(params, &CancellationToken::new(), EventSink::new()).await?;
//!
//! let rows = session
//!     .execute_reader("select title_id, price from titles", &[])
//!     .await?
//!     .collect_rows()
//!     .await?;
//! println!("{} titles", rows.len());
//!
//! session.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
mod login;
pub mod row;
pub mod session;
pub mod state;
pub mod stream;
pub mod transport;

pub use cancel::CancelHandle;
pub use config::{ConnectionParameters, DEFAULT_LOGIN_TIMEOUT, DEFAULT_MAX_POOL_SIZE, DEFAULT_PORT};
pub use error::{DatabaseErrors, Error, Result};
pub use events::{EventKind, EventSink, SubscriptionId, TraceEvent};
pub use row::{OutputParameter, OutputParameters, Row};
pub use session::{DEFAULT_ATTENTION_GRACE, ServerInfo, Session};
pub use state::{LoginState, SessionState};
pub use stream::{DoneKind, ResponseItem, ResultStream};
pub use transport::Transport;

// Protocol types that appear in this crate's API.
pub use tds5_protocol::{ColumnFormat, DataType, Done, RpcParam, ServerMessage, SqlValue};
pub use tokio_util::sync::CancellationToken;
