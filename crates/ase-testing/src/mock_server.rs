//! Mock ASE server for unit testing.
//!
//! This module provides a mock Adaptive Server that speaks enough TDS 5.0
//! for driver tests to run without a real database instance.
//!
//! ## Features
//!
//! - Accepts the login record and answers with LOGINACK, ENVCHANGE and DONE
//! - Optional credential check that rejects logins with error 4002
//! - Scripted responses keyed by command text or procedure name
//! - Attention handling, including a server that never acknowledges
//! - Delays and abrupt disconnects for timeout and fault tests
//! - Raw response bytes for malformed-stream tests
//! - Optional TLS with a generated certificate
//! - A log of every request received
//!
//! ## Example
//!
//! ```rust,ignore
//! use ase_testing::mock_server::{MockAseServer, MockResponse};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockAseServer::builder()
//!         .with_response("select 1", MockResponse::scalar(1i32))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Connect your client to server.addr()...
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ase_codec::Connection;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tds5_protocol::packet::{BufferType, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use tds5_protocol::{
    Charset, ColumnFormat, Done, DoneStatus, EnvChange, EnvChangeType, LoginAck, LoginRecord,
    LoginStatus, ParamFormat, Row, RowFormat, ServerMessage, SqlValue, TDS_VERSION, Token,
    TokenContext, TokenParser, TranState,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::tls::MockTlsIdentity;

/// Error number ASE reports for a rejected login.
pub const LOGIN_FAILED: i32 = 4002;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] ase_codec::CodecError),

    /// Token error.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds5_protocol::ProtocolError),

    /// The client sent something out of order.
    #[error("unexpected request: {0}")]
    Unexpected(String),

    /// Certificate generation or TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

type ResponseFn = Arc<dyn Fn(&MockRequest) -> MockResponse + Send + Sync>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// A result set with named columns.
    ///
    /// Column types are derived from the first row.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<SqlValue>>,
    },

    /// A server message; severity 11 and above also marks the DONE as failed.
    Message {
        /// Message number.
        number: i32,
        /// Severity.
        severity: u8,
        /// Text.
        text: String,
    },

    /// Rows affected count (for insert/update/delete).
    RowsAffected(u64),

    /// Procedure completion with output parameters and a return status.
    Procedure {
        /// Output parameter names and values.
        output: Vec<(String, SqlValue)>,
        /// Return status.
        return_status: i32,
    },

    /// Raw tokens, sent as given.
    Tokens(Vec<Token>),

    /// Bytes sent as the whole response payload, without encoding.
    RawBytes(Bytes),

    /// Several responses sent as one message, in order.
    Sequence(Vec<MockResponse>),

    /// Wait before answering. An attention during the wait is acknowledged
    /// and the answer is skipped.
    Delay(Duration, Box<MockResponse>),

    /// Never answer and ignore attentions.
    Hang,

    /// Close the connection without answering.
    Disconnect,

    /// Compute the response from the request.
    Custom(ResponseFn),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Message {
                number,
                severity,
                text,
            } => f
                .debug_struct("Message")
                .field("number", number)
                .field("severity", severity)
                .field("text", text)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Procedure {
                output,
                return_status,
            } => f
                .debug_struct("Procedure")
                .field("output", output)
                .field("return_status", return_status)
                .finish(),
            Self::Tokens(tokens) => f.debug_tuple("Tokens").field(&tokens.len()).finish(),
            Self::RawBytes(bytes) => f.debug_tuple("RawBytes").field(&bytes.len()).finish(),
            Self::Sequence(items) => f.debug_tuple("Sequence").field(items).finish(),
            Self::Delay(d, inner) => f.debug_tuple("Delay").field(d).field(inner).finish(),
            Self::Hang => f.write_str("Hang"),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A one-row, one-column result.
    pub fn scalar(value: impl Into<SqlValue>) -> Self {
        Self::rows(&[""], vec![vec![value.into()]])
    }

    /// A result set.
    pub fn rows(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    /// An empty successful response.
    pub fn empty() -> Self {
        Self::Tokens(vec![Token::Done(Done::new(
            DoneStatus::empty(),
            TranState::NotInTransaction,
            0,
        ))])
    }

    /// A rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// An error of severity 16.
    pub fn error(number: i32, text: impl Into<String>) -> Self {
        Self::Message {
            number,
            severity: 16,
            text: text.into(),
        }
    }

    /// An informational message of severity 10.
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            number: 0,
            severity: 10,
            text: text.into(),
        }
    }

    /// A message of any severity.
    pub fn message(number: i32, severity: u8, text: impl Into<String>) -> Self {
        Self::Message {
            number,
            severity,
            text: text.into(),
        }
    }

    /// Answer after `delay`.
    pub fn delayed(delay: Duration, response: MockResponse) -> Self {
        Self::Delay(delay, Box::new(response))
    }

    /// Build the tokens of this response, without the closing DONE of a
    /// sequence.
    fn tokens(&self, request: &MockRequest, out: &mut Vec<Token>) {
        match self {
            Self::Rows { columns, rows } => {
                let ctx = TokenContext::default();
                let sample = rows.first();
                let format = RowFormat {
                    wide: false,
                    columns: columns
                        .iter()
                        .enumerate()
                        .map(|(i, name)| {
                            let value = sample
                                .and_then(|row| row.get(i))
                                .cloned()
                                .unwrap_or(SqlValue::Null);
                            ColumnFormat::for_param(name, &value, false, &ctx)
                        })
                        .collect(),
                };
                out.push(Token::RowFormat(Arc::new(format)));
                out.extend(rows.iter().map(|values| {
                    Token::Row(Row {
                        values: values.clone(),
                    })
                }));
                out.push(done(DoneStatus::COUNT, rows.len() as i32));
            }
            Self::Message {
                number,
                severity,
                text,
            } => {
                let message = ServerMessage {
                    number: *number,
                    severity: *severity,
                    state: 1,
                    text: text.clone(),
                    server: "MOCK_ASE".into(),
                    ..ServerMessage::default()
                };
                out.push(Token::Eed(message));
                if *severity >= ServerMessage::ERROR_SEVERITY {
                    out.push(done(DoneStatus::ERROR, 0));
                }
            }
            Self::RowsAffected(count) => out.push(done(DoneStatus::COUNT, *count as i32)),
            Self::Procedure {
                output,
                return_status,
            } => {
                let ctx = TokenContext::default();
                out.push(Token::ReturnStatus(*return_status));
                if !output.is_empty() {
                    let format = ParamFormat {
                        wide: false,
                        columns: output
                            .iter()
                            .map(|(name, value)| ColumnFormat::for_param(name, value, true, &ctx))
                            .collect(),
                    };
                    out.push(Token::ParamFormat(Arc::new(format)));
                    out.push(Token::Params(Row {
                        values: output.iter().map(|(_, v)| v.clone()).collect(),
                    }));
                }
                out.push(Token::DoneProc(Done::new(
                    DoneStatus::empty(),
                    TranState::NotInTransaction,
                    0,
                )));
            }
            Self::Tokens(tokens) => out.extend(tokens.iter().cloned()),
            Self::Sequence(items) => {
                for item in items {
                    item.tokens(request, out);
                }
            }
            Self::Custom(f) => f(request).tokens(request, out),
            Self::Delay(_, inner) => inner.tokens(request, out),
            Self::Hang | Self::Disconnect | Self::RawBytes(_) => {}
        }
    }
}

fn done(status: DoneStatus, count: i32) -> Token {
    Token::Done(Done::new(status, TranState::NotInTransaction, count))
}

/// A request received by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub enum MockRequest {
    /// A language command.
    Language {
        /// Command text.
        text: String,
        /// Parameter values.
        params: Vec<SqlValue>,
    },
    /// A procedure call.
    Rpc {
        /// Procedure name.
        name: String,
        /// Parameter values.
        params: Vec<SqlValue>,
    },
}

impl MockRequest {
    /// Command text or procedure name.
    pub fn text(&self) -> &str {
        match self {
            Self::Language { text, .. } => text,
            Self::Rpc { name, .. } => name,
        }
    }

    /// Parameter values in order.
    pub fn params(&self) -> &[SqlValue] {
        match self {
            Self::Language { params, .. } | Self::Rpc { params, .. } => params,
        }
    }
}

/// What a mock connection should do about a login.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Responses keyed by normalised command text or procedure name.
    pub responses: HashMap<String, MockResponse>,
    /// Response for requests without an entry.
    pub default_response: MockResponse,
    /// Accepted credentials; any login is accepted when unset.
    pub credentials: Option<(String, String)>,
    /// Database reported after login.
    pub database: String,
    /// Upper bound of the packet size granted at login.
    pub max_packet_size: usize,
    /// Wait before answering a login.
    pub login_delay: Option<Duration>,
    /// Product name reported in LOGINACK.
    pub server_name: String,
    /// Wrap each accepted socket in TLS before the login.
    pub tls: Option<MockTlsIdentity>,
}

/// Builder for configuring a mock server.
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                default_response: MockResponse::empty(),
                credentials: None,
                database: "master".to_string(),
                max_packet_size: 4096,
                login_delay: None,
                server_name: "sql server".to_string(),
                tls: None,
            },
        }
    }

    /// Add a response for a command text or procedure name.
    pub fn with_response(mut self, text: impl AsRef<str>, response: MockResponse) -> Self {
        self.config
            .responses
            .insert(normalize(text.as_ref()), response);
        self
    }

    /// Set the response for unmatched requests.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Only accept this user and password.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((user.into(), password.into()));
        self
    }

    /// Set the database reported after login.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Cap the packet size granted at login.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Wait before answering each login.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.config.login_delay = Some(delay);
        self
    }

    /// Set the product name reported in LOGINACK.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Require TLS with a freshly generated certificate.
    pub fn with_tls(self) -> Result<Self> {
        Ok(self.with_tls_identity(MockTlsIdentity::generate()?))
    }

    /// Require TLS with the given identity.
    pub fn with_tls_identity(mut self, identity: MockTlsIdentity) -> Self {
        self.config.tls = Some(identity);
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockAseServer> {
        MockAseServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    logins: AtomicUsize,
    attentions: AtomicUsize,
    logouts: AtomicUsize,
}

/// A mock ASE server for testing.
///
/// Each accepted socket is served on its own task until the client logs
/// out, disconnects or the server is stopped.
pub struct MockAseServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    counters: Arc<Counters>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
    tls: Option<MockTlsIdentity>,
}

impl MockAseServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let tls = config.tls.clone();
        let config = Arc::new(config);
        let counters = Arc::new(Counters::default());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            counters: Arc::clone(&counters),
            requests: Arc::clone(&requests),
            tls,
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, _peer)) => {
                            let config = Arc::clone(&config);
                            let counters = Arc::clone(&counters);
                            let requests = Arc::clone(&requests);
                            let mut stop = shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                counters.active.fetch_add(1, Ordering::SeqCst);
                                tokio::select! {
                                    result = serve_socket(stream, &config, &counters, &requests) => {
                                        if let Err(e) = result {
                                            tracing::debug!(error = %e, "mock connection ended");
                                        }
                                    }
                                    _ = stop.recv() => {}
                                }
                                counters.active.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Logins accepted so far.
    pub fn login_count(&self) -> usize {
        self.counters.logins.load(Ordering::SeqCst)
    }

    /// Attentions received so far.
    pub fn attention_count(&self) -> usize {
        self.counters.attentions.load(Ordering::SeqCst)
    }

    /// Logouts received so far.
    pub fn logout_count(&self) -> usize {
        self.counters.logouts.load(Ordering::SeqCst)
    }

    /// TLS identity, when the server requires TLS.
    pub fn tls_identity(&self) -> Option<&MockTlsIdentity> {
        self.tls.as_ref()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    /// Stop accepting and close every open connection.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockAseServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MockAseServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAseServer")
            .field("addr", &self.addr)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Whether the connection should keep serving requests.
enum Flow {
    Continue,
    Close,
}

async fn serve_socket(
    stream: TcpStream,
    config: &MockServerConfig,
    counters: &Counters,
    requests: &Mutex<Vec<MockRequest>>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    match &config.tls {
        Some(identity) => {
            let stream = identity.acceptor().accept(stream).await?;
            tracing::trace!("mock TLS handshake completed");
            handle_connection(stream, config, counters, requests).await
        }
        None => handle_connection(stream, config, counters, requests).await,
    }
}

async fn handle_connection<S>(
    stream: S,
    config: &MockServerConfig,
    counters: &Counters,
    requests: &Mutex<Vec<MockRequest>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream);

    let Some(login) = conn.read_message().await? else {
        return Ok(());
    };
    if login.buffer_type != BufferType::Login {
        return Err(MockServerError::Unexpected(format!(
            "expected login, got {:?}",
            login.buffer_type
        )));
    }
    let record = LoginRecord::decode(&mut login.payload.clone())?;
    let ctx = TokenContext::new(
        record.byte_order,
        Charset::from_name(&record.charset).unwrap_or_default(),
    );

    if let Some(delay) = config.login_delay {
        tokio::time::sleep(delay).await;
    }
    if !send_login_response(&mut conn, &record, config, &ctx).await? {
        return Ok(());
    }
    counters.logins.fetch_add(1, Ordering::SeqCst);

    let mut database = config.database.clone();
    loop {
        let Some(message) = conn.read_message().await? else {
            break;
        };
        if message.buffer_type == BufferType::Attention {
            // Nothing is running; acknowledge anyway.
            counters.attentions.fetch_add(1, Ordering::SeqCst);
            send_attention_ack(&mut conn, &ctx).await?;
            continue;
        }

        let mut parser = TokenParser::new(ctx.clone());
        parser.push(&message.payload);
        let mut request = None;
        let mut params = Vec::new();
        let mut logout = false;
        while let Some(token) = parser.next_token()? {
            match token {
                Token::Language(lang) => {
                    request = Some(MockRequest::Language {
                        text: lang.text,
                        params: Vec::new(),
                    });
                }
                Token::DbRpc(rpc) => {
                    request = Some(MockRequest::Rpc {
                        name: rpc.name,
                        params: Vec::new(),
                    });
                }
                Token::Params(row) => params = row.values,
                Token::Logout(_) => logout = true,
                _ => {}
            }
        }

        if logout {
            counters.logouts.fetch_add(1, Ordering::SeqCst);
            send_tokens(&mut conn, &ctx, &[done(DoneStatus::empty(), 0)]).await?;
            break;
        }
        let Some(mut request) = request else {
            return Err(MockServerError::Unexpected("no request token".into()));
        };
        match &mut request {
            MockRequest::Language { params: p, .. } | MockRequest::Rpc { params: p, .. } => {
                *p = params;
            }
        }
        tracing::trace!(request = ?request, "mock request");
        requests.lock().push(request.clone());

        let response = lookup(config, &request, &mut database);
        match respond(&mut conn, &ctx, &request, response, counters).await? {
            Flow::Continue => {}
            Flow::Close => break,
        }
    }
    Ok(())
}

/// Returns whether the login was accepted.
async fn send_login_response<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    record: &LoginRecord,
    config: &MockServerConfig,
    ctx: &TokenContext,
) -> Result<bool> {
    let accepted = match &config.credentials {
        Some((user, password)) => record.user_name == *user && record.password == *password,
        None => true,
    };

    let mut tokens = Vec::new();
    if accepted {
        let packet_size = (record.packet_size as usize).clamp(MIN_PACKET_SIZE, config.max_packet_size);
        tokens.push(Token::EnvChange(vec![
            EnvChange {
                kind: EnvChangeType::Database,
                new_value: config.database.clone(),
                old_value: "master".into(),
            },
            EnvChange {
                kind: EnvChangeType::PacketSize,
                new_value: packet_size.to_string(),
                old_value: MIN_PACKET_SIZE.to_string(),
            },
        ]));
        tokens.push(Token::Eed(ServerMessage {
            number: 5701,
            severity: 10,
            state: 1,
            text: format!("Changed database context to '{}'.", config.database),
            ..ServerMessage::default()
        }));
    } else {
        tokens.push(Token::Eed(ServerMessage {
            number: LOGIN_FAILED,
            severity: 14,
            state: 1,
            text: "Login failed.".into(),
            ..ServerMessage::default()
        }));
    }
    tokens.push(Token::LoginAck(LoginAck {
        status: if accepted {
            LoginStatus::Succeed
        } else {
            LoginStatus::Fail
        },
        tds_version: TDS_VERSION,
        program_name: config.server_name.clone(),
        program_version: [16, 0, 4, 2],
    }));
    tokens.push(done(
        if accepted {
            DoneStatus::empty()
        } else {
            DoneStatus::ERROR
        },
        0,
    ));

    send_tokens(conn, ctx, &tokens).await?;
    if accepted {
        let packet_size = (record.packet_size as usize).clamp(MIN_PACKET_SIZE, config.max_packet_size);
        conn.set_packet_size(packet_size);
    }
    Ok(accepted)
}

fn lookup(config: &MockServerConfig, request: &MockRequest, database: &mut String) -> MockResponse {
    let key = normalize(request.text());
    if let Some(response) = config.responses.get(&key) {
        return response.clone();
    }

    if let Some(db) = key.strip_prefix("use ") {
        let old = std::mem::replace(database, db.trim().to_string());
        return MockResponse::Tokens(vec![
            Token::EnvChange(vec![EnvChange {
                kind: EnvChangeType::Database,
                new_value: database.clone(),
                old_value: old,
            }]),
            done(DoneStatus::empty(), 0),
        ]);
    }
    if key == "select 1" {
        return MockResponse::scalar(1i32);
    }
    config.default_response.clone()
}

async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    ctx: &TokenContext,
    request: &MockRequest,
    response: MockResponse,
    counters: &Counters,
) -> Result<Flow> {
    match response {
        MockResponse::Disconnect => Ok(Flow::Close),
        MockResponse::Hang => {
            // Swallow attentions until the client goes away.
            while let Some(message) = conn.read_message().await? {
                if message.buffer_type == BufferType::Attention {
                    counters.attentions.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(Flow::Close)
        }
        MockResponse::Delay(delay, inner) => {
            let interrupted = tokio::select! {
                () = tokio::time::sleep(delay) => None,
                message = conn.read_message() => Some(message?),
            };
            match interrupted {
                None => Box::pin(respond(conn, ctx, request, *inner, counters)).await,
                Some(Some(m)) if m.buffer_type == BufferType::Attention => {
                    counters.attentions.fetch_add(1, Ordering::SeqCst);
                    send_attention_ack(conn, ctx).await?;
                    Ok(Flow::Continue)
                }
                Some(Some(m)) => Err(MockServerError::Unexpected(format!(
                    "{:?} while a request is running",
                    m.buffer_type
                ))),
                Some(None) => Ok(Flow::Close),
            }
        }
        MockResponse::Custom(f) => Box::pin(respond(conn, ctx, request, f(request), counters)).await,
        MockResponse::RawBytes(payload) => {
            conn.send_message(BufferType::Response, payload).await?;
            Ok(Flow::Continue)
        }
        other => {
            let mut tokens = Vec::new();
            other.tokens(request, &mut tokens);
            send_tokens(conn, ctx, &tokens).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Send DONE with the attention bit.
async fn send_attention_ack<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    ctx: &TokenContext,
) -> Result<()> {
    send_tokens(conn, ctx, &[done(DoneStatus::ATTN, 0)]).await
}

/// Encode `tokens` as one response message.
pub async fn send_tokens<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    ctx: &TokenContext,
    tokens: &[Token],
) -> Result<()> {
    let payload = encode_tokens(tokens, ctx)?;
    conn.send_message(BufferType::Response, payload.freeze()).await?;
    Ok(())
}

/// Encode tokens in order, tracking the formats they declare.
pub fn encode_tokens(tokens: &[Token], ctx: &TokenContext) -> Result<BytesMut> {
    let mut ctx = ctx.clone();
    let mut buf = BytesMut::new();
    for token in tokens {
        token.encode(&mut buf, &ctx)?;
        ctx.observe(token);
    }
    Ok(buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn language(text: &str) -> MockRequest {
        MockRequest::Language {
            text: text.into(),
            params: Vec::new(),
        }
    }

    fn decode_all(buf: &[u8]) -> Vec<Token> {
        let mut parser = TokenParser::new(TokenContext::default());
        parser.push(buf);
        let mut tokens = Vec::new();
        while let Some(token) = parser.next_token().unwrap() {
            tokens.push(token);
        }
        parser.finish().unwrap();
        tokens
    }

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockAseServer::builder().build().await.unwrap();
        assert!(server.port() > 0);
        assert_eq!(server.host(), "127.0.0.1");
        assert_eq!(server.connection_count(), 0);
        assert!(server.requests().is_empty());
    }

    #[test]
    fn test_rows_response_encodes() {
        let response = MockResponse::rows(
            &["id", "name"],
            vec![
                vec![SqlValue::from(1i32), SqlValue::from("Alice")],
                vec![SqlValue::from(2i32), SqlValue::Null],
            ],
        );
        let mut tokens = Vec::new();
        response.tokens(&language("select"), &mut tokens);
        let buf = encode_tokens(&tokens, &TokenContext::default()).unwrap();

        let decoded = decode_all(&buf);
        assert_eq!(decoded.len(), 4);
        assert!(matches!(&decoded[0], Token::RowFormat(f) if f.columns.len() == 2));
        assert!(matches!(&decoded[2], Token::Row(r) if r.values[1].is_null()));
        assert!(matches!(decoded[3], Token::Done(d) if d.count == 2 && d.has_count()));
    }

    #[test]
    fn test_error_response_marks_done() {
        let mut tokens = Vec::new();
        MockResponse::error(208, "foo not found.").tokens(&language("select"), &mut tokens);
        assert!(matches!(&tokens[0], Token::Eed(m) if m.number == 208 && m.severity == 16));
        assert!(matches!(tokens[1], Token::Done(d) if d.is_error()));

        let mut tokens = Vec::new();
        MockResponse::info("hello").tokens(&language("print"), &mut tokens);
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_lookup_normalizes_and_tracks_database() {
        let config = MockServerBuilder::new()
            .with_response("SELECT  *\nFROM titles", MockResponse::affected(3))
            .config;
        let mut database = "master".to_string();

        let found = lookup(&config, &language("select * from TITLES"), &mut database);
        assert!(matches!(found, MockResponse::RowsAffected(3)));

        let used = lookup(&config, &language("use pubs2"), &mut database);
        assert!(matches!(used, MockResponse::Tokens(_)));
        assert_eq!(database, "pubs2");
    }

    #[test]
    fn test_custom_response_sees_request() {
        let response = MockResponse::Custom(Arc::new(|req: &MockRequest| {
            MockResponse::affected(req.params().len() as u64)
        }));
        let request = MockRequest::Rpc {
            name: "sp_who".into(),
            params: vec![SqlValue::from(1i32), SqlValue::from(2i32)],
        };
        let mut tokens = Vec::new();
        response.tokens(&request, &mut tokens);
        assert!(matches!(tokens[0], Token::Done(d) if d.count == 2));
    }
}
