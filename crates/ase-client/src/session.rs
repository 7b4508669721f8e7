//! A logged-in ASE session.
//!
//! A [`Session`] owns one socket and runs one request at a time. Results are
//! read lazily through a [`ResultStream`]; a stream that is dropped early
//! leaves its response pending and the next request drains it first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ase_codec::{Connection, Packet};
use bytes::{Bytes, BytesMut};
use tds5_protocol::packet::{BufferType, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use tds5_protocol::{
    Charset, EnvChange, EnvChangeType, LanguageRequest, LoginAck, RpcParam, RpcRequest, SqlValue,
    Token, TokenParser,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelHandle;
use crate::config::ConnectionParameters;
use crate::error::{DatabaseErrors, Error, Result};
use crate::events::EventSink;
use crate::login;
use crate::state::SessionState;
use crate::stream::ResultStream;
use crate::transport::Transport;

/// How long to wait for the server to acknowledge an attention.
pub const DEFAULT_ATTENTION_GRACE: Duration = Duration::from_secs(5);

/// Server identity reported by the login acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Product name, usually `sql server`.
    pub product: String,
    /// Product version as dotted text.
    pub version: String,
    /// TDS version the server speaks.
    pub tds_version: [u8; 4],
}

impl From<&LoginAck> for ServerInfo {
    fn from(ack: &LoginAck) -> Self {
        Self {
            product: ack.program_name.clone(),
            version: ack.version_string(),
            tds_version: ack.tds_version,
        }
    }
}

/// Where the session is inside the current response.
#[derive(Debug, Default)]
struct ResponseState {
    /// A response has been requested and not fully read.
    pending: bool,
    /// The packet holding the end of the current message has been read.
    end_of_message: bool,
    /// The server acknowledged an attention in this response.
    cancelled: bool,
}

/// A logged-in session on one ASE connection.
pub struct Session {
    conn: Connection<Transport>,
    parser: TokenParser,
    params: Arc<ConnectionParameters>,
    events: EventSink,
    server: ServerInfo,
    database: String,
    language: String,
    state: SessionState,
    response: ResponseState,
    transaction_depth: u32,
    in_request: Arc<AtomicBool>,
    request_cancel: Option<CancellationToken>,
    attention_grace: Duration,
    created_at: Instant,
    last_used: Instant,
}

impl Session {
    /// Connect, optionally wrap in TLS, log in and apply the post-login
    /// settings of `params`.
    ///
    /// The whole sequence is bounded by `LoginTimeout` and stops with
    /// [`Error::Cancelled`] as soon as `cancel` fires. A failed attempt
    /// closes its socket.
    pub async fn connect(
        params: Arc<ConnectionParameters>,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<Self> {
        login::establish(params, cancel, events).await
    }

    pub(crate) fn from_login(
        conn: Connection<Transport>,
        parser: TokenParser,
        params: Arc<ConnectionParameters>,
        events: EventSink,
        outcome: login::LoginOutcome,
    ) -> Self {
        let now = Instant::now();
        let session = Self {
            conn,
            parser,
            params,
            events,
            server: outcome.server,
            database: outcome.database,
            language: outcome.language,
            state: SessionState::Open,
            response: ResponseState::default(),
            transaction_depth: 0,
            in_request: Arc::new(AtomicBool::new(false)),
            request_cancel: None,
            attention_grace: DEFAULT_ATTENTION_GRACE,
            created_at: now,
            last_used: now,
        };
        session
            .events
            .emit_state_change(SessionState::Closed, SessionState::Open);
        session
    }

    /// Run a language command and stream its results.
    pub async fn execute_reader(
        &mut self,
        sql: &str,
        params: &[RpcParam],
    ) -> Result<ResultStream<'_>> {
        let trace = self.events.trace("execute_reader");
        tracing::debug!(sql = sql, params = params.len(), "executing language command");

        let request = params
            .iter()
            .cloned()
            .fold(LanguageRequest::new(sql), LanguageRequest::param);
        self.begin_request().await?;
        let payload = request.encode(self.parser.context())?;
        self.send_request(payload).await?;
        Ok(ResultStream::new(self, trace))
    }

    /// Call a stored procedure and stream its results.
    ///
    /// Output parameters and the return status arrive as stream items and
    /// are also kept on the stream once read.
    pub async fn execute_procedure(
        &mut self,
        name: &str,
        params: &[RpcParam],
    ) -> Result<ResultStream<'_>> {
        let trace = self.events.trace("execute_procedure");
        tracing::debug!(procedure = name, params = params.len(), "calling procedure");

        let request = params
            .iter()
            .cloned()
            .fold(RpcRequest::new(name), RpcRequest::param);
        self.begin_request().await?;
        let payload = request.encode(self.parser.context())?;
        self.send_request(payload).await?;
        Ok(ResultStream::new(self, trace))
    }

    /// Run a command and return the number of rows it affected.
    pub async fn execute_non_query(&mut self, sql: &str, params: &[RpcParam]) -> Result<u64> {
        let stream = self.execute_reader(sql, params).await?;
        Ok(stream.finish().await?.unwrap_or(0))
    }

    /// Run a query and return the first column of its first row.
    ///
    /// The rest of the response is read and its errors are still raised.
    pub async fn execute_scalar(
        &mut self,
        sql: &str,
        params: &[RpcParam],
    ) -> Result<Option<SqlValue>> {
        let mut stream = self.execute_reader(sql, params).await?;
        let value = match stream.next_row().await? {
            Some(row) => row.into_values().into_iter().next(),
            None => None,
        };
        stream.finish().await?;
        Ok(value)
    }

    /// Switch the current database with `use`.
    pub async fn change_database(&mut self, database: &str) -> Result<()> {
        validate_identifier(database)?;
        self.execute_non_query(&format!("use {database}"), &[])
            .await?;
        if !self.database.eq_ignore_ascii_case(database) {
            tracing::debug!(
                requested = database,
                reported = %self.database,
                "server did not report the database change"
            );
            self.database = database.to_string();
        }
        Ok(())
    }

    /// Check the session with a trivial round trip.
    pub async fn ping(&mut self) -> Result<()> {
        let _trace = self.events.trace("ping");
        match self.execute_scalar("select 1", &[]).await? {
            Some(_) => Ok(()),
            None => Err(Error::Connection("ping returned no row".into())),
        }
    }

    /// Start a transaction, nesting inside any open one.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.execute_non_query("begin transaction", &[]).await?;
        self.transaction_depth += 1;
        Ok(())
    }

    /// Commit the innermost transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.execute_non_query("commit transaction", &[]).await?;
        self.transaction_depth = self.transaction_depth.saturating_sub(1);
        Ok(())
    }

    /// Roll back every open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.execute_non_query("rollback transaction", &[]).await?;
        self.transaction_depth = 0;
        Ok(())
    }

    /// Handle for cancelling the running request from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.conn.attention_handle(), Arc::clone(&self.in_request))
    }

    /// Cancel the next request when `token` fires.
    ///
    /// The token applies to one request and is cleared when its response
    /// completes.
    pub fn set_request_cancellation(&mut self, token: CancellationToken) {
        self.request_cancel = Some(token);
    }

    /// Change how long to wait for an attention acknowledgement before the
    /// session is doomed.
    pub fn set_attention_grace(&mut self, grace: Duration) {
        self.attention_grace = grace;
    }

    /// Log out and close the socket.
    pub async fn close(mut self) -> Result<()> {
        let _trace = self.events.trace("close");
        if self.state.is_usable() {
            if self.response.pending {
                // Discard the unread part of the current message; the server
                // takes the logout after it.
                match tokio::time::timeout(Duration::from_secs(1), self.conn.drain_message()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::debug!(error = %e, "unread response not drained"),
                    Err(_) => tracing::debug!("draining unread response timed out"),
                }
            }
            let mut buf = BytesMut::new();
            Token::Logout(0).encode(&mut buf, self.parser.context())?;
            if let Err(e) = self.conn.send_message(BufferType::Normal, buf.freeze()).await {
                tracing::debug!(error = %e, "logout not delivered");
            } else {
                // The server answers with a DONE; do not wait long for it.
                let _ = tokio::time::timeout(Duration::from_secs(1), self.conn.read_message()).await;
            }
        }
        let result = self.conn.shutdown().await;
        self.set_state(SessionState::Closed);
        tracing::debug!(database = %self.database, "session closed");
        result.map_err(Error::from)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether an earlier fault made this session unusable.
    #[must_use]
    pub fn is_doomed(&self) -> bool {
        self.state == SessionState::Broken
    }

    /// Whether a response has not been fully read.
    #[must_use]
    pub fn has_pending_response(&self) -> bool {
        self.response.pending
    }

    /// Current database, as last reported by the server.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Current language, as last reported by the server.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Server identity.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.conn.packet_size()
    }

    /// Charset of character data on this session.
    #[must_use]
    pub fn charset(&self) -> Charset {
        self.parser.context().charset
    }

    /// Transactions opened through this session and not yet finished.
    #[must_use]
    pub fn transaction_depth(&self) -> u32 {
        self.transaction_depth
    }

    /// Whether a transaction opened through this session is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    /// Parameters this session was opened with.
    #[must_use]
    pub fn params(&self) -> &Arc<ConnectionParameters> {
        &self.params
    }

    /// Event callbacks of this session.
    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Deliver further events to `events`, as when a pooled session is
    /// handed to a new owner.
    pub fn set_events(&mut self, events: EventSink) {
        self.events = events;
    }

    /// Whether the socket is wrapped in TLS.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.params.encryption
    }

    /// Time since the session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last response completed.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    // ------------------------------------------------------------------
    // Request plumbing shared with `ResultStream` and login.
    // ------------------------------------------------------------------

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Broken => Err(Error::SessionDoomed),
            SessionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Get the session ready for a new request.
    async fn begin_request(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.response.pending || self.conn.is_attention_pending() {
            self.drain_pending().await?;
        }
        if let Some(token) = &self.request_cancel {
            if token.is_cancelled() {
                self.request_cancel = None;
                return Err(Error::Cancelled);
            }
        }
        self.parser.clear();
        self.parser.context_mut().reset_formats();
        self.response = ResponseState::default();
        Ok(())
    }

    async fn send_request(&mut self, payload: Bytes) -> Result<()> {
        if let Err(e) = self.conn.send_message(BufferType::Normal, payload).await {
            return Err(self.doom(e.into()));
        }
        self.response.pending = true;
        self.in_request.store(true, Ordering::Release);
        Ok(())
    }

    /// Read and discard the rest of an abandoned response.
    ///
    /// Errors inside it belonged to the abandoned request and are dropped,
    /// but environment changes still apply.
    pub(crate) async fn drain_pending(&mut self) -> Result<()> {
        tracing::debug!("draining unread response");
        if !self.response.pending {
            // Only a late attention acknowledgement is outstanding.
            self.response = ResponseState {
                pending: true,
                ..ResponseState::default()
            };
        }
        while let Some(token) = self.next_token().await? {
            if let Token::EnvChange(changes) = &token {
                self.apply_env_changes(changes);
            }
        }
        self.end_response();
        Ok(())
    }

    /// Next token of the current response, or `None` once it is complete.
    ///
    /// A response is complete at the end of its message unless an attention
    /// is still unacknowledged, in which case reading continues into the
    /// following message.
    pub(crate) async fn next_token(&mut self) -> Result<Option<Token>> {
        self.ensure_usable()?;
        if !self.response.pending {
            return Ok(None);
        }
        loop {
            match self.parser.next_token() {
                Ok(Some(token)) => {
                    if token.as_done().is_some_and(|done| done.is_attention_ack()) {
                        self.acknowledge_attention();
                    }
                    return Ok(Some(token));
                }
                Ok(None) => {}
                Err(e) => return Err(self.doom(e.into())),
            }

            if self.response.end_of_message {
                if let Err(e) = self.parser.finish() {
                    return Err(self.doom(e.into()));
                }
                if !self.conn.is_attention_pending() {
                    return Ok(None);
                }
                self.response.end_of_message = false;
            }

            let packet = self.read_packet().await?;
            if packet.header.is_attention_ack() {
                self.acknowledge_attention();
            }
            self.response.end_of_message = packet.is_end_of_message();
            self.parser.push(&packet.payload);
        }
    }

    fn acknowledge_attention(&mut self) {
        if self.conn.is_attention_pending() {
            tracing::debug!("attention acknowledged");
        }
        self.conn.clear_attention();
        self.response.cancelled = true;
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        enum Outcome {
            Read(std::result::Result<Option<Packet>, ase_codec::CodecError>),
            Cancel,
            AttentionSent,
            GraceExpired,
        }

        // An attention written by a `CancelHandle` wakes an unbounded read so
        // that the grace period starts counting.
        let attention_sent = self.conn.attention_signal();
        loop {
            let outcome = if self.conn.is_attention_pending() {
                match tokio::time::timeout(self.attention_grace, self.conn.read_packet()).await {
                    Ok(read) => Outcome::Read(read),
                    Err(_) => Outcome::GraceExpired,
                }
            } else if let Some(token) = self.request_cancel.clone() {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Outcome::Cancel,
                    () = attention_sent.notified() => Outcome::AttentionSent,
                    read = self.conn.read_packet() => Outcome::Read(read),
                }
            } else {
                tokio::select! {
                    biased;
                    () = attention_sent.notified() => Outcome::AttentionSent,
                    read = self.conn.read_packet() => Outcome::Read(read),
                }
            };

            match outcome {
                Outcome::Read(Ok(Some(packet))) => return Ok(packet),
                Outcome::Read(Ok(None)) => return Err(self.doom(Error::ConnectionClosed)),
                Outcome::Read(Err(e)) => return Err(self.doom(e.into())),
                Outcome::Cancel => {
                    self.request_cancel = None;
                    tracing::debug!("request cancelled, sending attention");
                    if let Err(e) = self.conn.attention_handle().send().await {
                        return Err(self.doom(e.into()));
                    }
                }
                Outcome::AttentionSent => {
                    tracing::trace!("attention sent while reading");
                }
                Outcome::GraceExpired => {
                    tracing::warn!(
                        grace_ms = self.attention_grace.as_millis() as u64,
                        "attention not acknowledged, dooming session"
                    );
                    self.doom(Error::Cancelled);
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    /// Finish the current response, raising what it collected.
    pub(crate) fn complete_response(&mut self, errors: Vec<tds5_protocol::ServerMessage>) -> Result<()> {
        let cancelled = self.response.cancelled;
        self.end_response();
        if cancelled {
            return Err(Error::Cancelled);
        }
        if !errors.is_empty() {
            let errors = DatabaseErrors::new(errors);
            tracing::debug!(error = %errors, "request failed");
            return Err(Error::Database(errors));
        }
        Ok(())
    }

    fn end_response(&mut self) {
        self.response = ResponseState::default();
        self.in_request.store(false, Ordering::Release);
        self.request_cancel = None;
        self.last_used = Instant::now();
    }

    pub(crate) fn apply_env_changes(&mut self, changes: &[EnvChange]) {
        for change in changes {
            apply_env_change(
                change,
                &mut self.database,
                &mut self.language,
                &mut self.parser,
                &mut self.conn,
            );
        }
    }

    pub(crate) fn parser(&self) -> &TokenParser {
        &self.parser
    }

    pub(crate) fn emit_message(&self, message: &tds5_protocol::ServerMessage) {
        self.events.emit_message(message);
    }

    /// Mark the session as broken and hand back `err`.
    pub(crate) fn doom(&mut self, err: Error) -> Error {
        if self.state == SessionState::Open {
            tracing::warn!(error = %err, "session doomed");
            self.set_state(SessionState::Broken);
        }
        self.response = ResponseState::default();
        self.in_request.store(false, Ordering::Release);
        err
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = std::mem::replace(&mut self.state, state);
        if previous != state {
            self.events.emit_state_change(previous, state);
        }
    }
}

/// Apply one environment change to session state.
pub(crate) fn apply_env_change(
    change: &EnvChange,
    database: &mut String,
    language: &mut String,
    parser: &mut TokenParser,
    conn: &mut Connection<Transport>,
) {
    match change.kind {
        EnvChangeType::Database => {
            tracing::debug!(database = %change.new_value, "database changed");
            database.clone_from(&change.new_value);
        }
        EnvChangeType::Language => language.clone_from(&change.new_value),
        EnvChangeType::Charset => match Charset::from_name(&change.new_value) {
            Some(charset) => parser.context_mut().charset = charset,
            None => tracing::warn!(charset = %change.new_value, "unknown charset reported"),
        },
        EnvChangeType::PacketSize => match change.new_value.trim().parse::<usize>() {
            Ok(size) => conn.set_packet_size(size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE)),
            Err(_) => tracing::warn!(value = %change.new_value, "unparsable packet size"),
        },
        EnvChangeType::Other(kind) => {
            tracing::trace!(kind = kind, value = %change.new_value, "ignored environment change");
        }
    }
}

/// Check that `name` can be spliced into a `use` command.
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            name.len() <= 255
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '#' | '$'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid database name '{name}'")))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("data_source", &self.params.data_source)
            .field("database", &self.database)
            .field("state", &self.state)
            .field("pending_response", &self.response.pending)
            .finish_non_exhaustive()
    }
}
