//! Runtime state of a session.
//!
//! ## Login
//!
//! ```text
//! Disconnected -> TcpConnecting -> (TlsHandshaking) -> LoginSent
//!     -> AwaitingLoginAck -> Ready
//! any state -> Failed
//! ```
//!
//! ## Session
//!
//! ```text
//! Open -> Closed (close())
//! Open -> Broken (transport/protocol fault, fatal server error,
//!                 unacknowledged attention)
//! ```

use std::fmt;

/// Step of the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoginState {
    /// Nothing started.
    #[default]
    Disconnected,
    /// Opening the TCP socket.
    TcpConnecting,
    /// Running the TLS handshake.
    TlsHandshaking,
    /// Login record written.
    LoginSent,
    /// Reading the login response.
    AwaitingLoginAck,
    /// Login accepted; the session can run requests.
    Ready,
    /// Login abandoned or rejected.
    Failed,
}

impl LoginState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Short name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::TcpConnecting => "tcp_connecting",
            Self::TlsHandshaking => "tls_handshaking",
            Self::LoginSent => "login_sent",
            Self::AwaitingLoginAck => "awaiting_login_ack",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Logged in and usable.
    Open,
    /// Closed on request.
    Closed,
    /// Doomed by a fault; must not be reused.
    Broken,
}

impl SessionState {
    /// Check if the session can run requests.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Broken => "broken",
        })
    }
}
