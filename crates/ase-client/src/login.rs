//! Connection establishment and login.
//!
//! Every step runs against one `LoginTimeout` deadline and the caller's
//! cancellation token. Whatever step is interrupted, the socket it owns is
//! dropped with it.

use std::future::Future;
use std::sync::Arc;

use ase_codec::Connection;
use tds5_protocol::packet::{BufferType, MIN_PACKET_SIZE};
use tds5_protocol::{
    ByteOrder, Charset, LoginRecord, LoginStatus, ServerMessage, Token, TokenContext, TokenParser,
};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionParameters;
use crate::error::{DatabaseErrors, Error, Result};
use crate::events::EventSink;
use crate::session::{ServerInfo, Session, apply_env_change};
use crate::state::LoginState;
use crate::transport::Transport;

/// What the login response established.
#[derive(Debug)]
pub(crate) struct LoginOutcome {
    pub(crate) server: ServerInfo,
    pub(crate) database: String,
    pub(crate) language: String,
}

struct Handshake<'a> {
    state: LoginState,
    deadline: Option<Instant>,
    cancel: &'a CancellationToken,
    address: String,
}

impl Handshake<'_> {
    fn transition(&mut self, next: LoginState) {
        tracing::debug!(
            address = %self.address,
            from = %self.state,
            to = %next,
            "login state"
        );
        self.state = next;
    }

    /// Run one step under the deadline and the cancellation token.
    async fn step<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, future)
                    .await
                    .map_err(|_| Error::ConnectTimeout)?,
                None => future.await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}

pub(crate) async fn establish(
    params: Arc<ConnectionParameters>,
    cancel: &CancellationToken,
    events: EventSink,
) -> Result<Session> {
    params.validate()?;
    let mut handshake = Handshake {
        state: LoginState::Disconnected,
        deadline: Instant::now().checked_add(params.login_timeout),
        cancel,
        address: params.address(),
    };

    match run(&mut handshake, params, events).await {
        Ok(session) => Ok(session),
        Err(e) => {
            tracing::debug!(address = %handshake.address, error = %e, at = %handshake.state, "login failed");
            handshake.transition(LoginState::Failed);
            Err(e)
        }
    }
}

async fn run(
    handshake: &mut Handshake<'_>,
    params: Arc<ConnectionParameters>,
    events: EventSink,
) -> Result<Session> {
    handshake.transition(LoginState::TcpConnecting);
    let address = handshake.address.clone();
    let tcp = handshake
        .step(async {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
        .await?;

    let transport = secure(handshake, &params, tcp).await?;
    let mut conn = Connection::new(transport);

    let login = login_record(&params);
    let payload = login.encode()?;
    handshake
        .step(async {
            conn.send_message(BufferType::Login, payload)
                .await
                .map_err(Error::from)
        })
        .await?;
    handshake.transition(LoginState::LoginSent);

    // Until the server says otherwise, outgoing packets use the size we asked for.
    conn.set_packet_size(usize::from(params.packet_size));

    let charset = params
        .charset
        .as_deref()
        .and_then(Charset::from_name)
        .unwrap_or_default();
    let mut parser = TokenParser::new(TokenContext::new(ByteOrder::Little, charset));

    handshake.transition(LoginState::AwaitingLoginAck);
    let outcome = handshake
        .step(read_login_response(&mut conn, &mut parser, &events))
        .await?;
    handshake.transition(LoginState::Ready);

    tracing::info!(
        address = %handshake.address,
        server = %outcome.server.product,
        version = %outcome.server.version,
        database = %outcome.database,
        packet_size = conn.packet_size(),
        "login acknowledged"
    );

    let mut session = Session::from_login(conn, parser, Arc::clone(&params), events, outcome);
    handshake.step(post_login(&mut session, &params)).await?;
    Ok(session)
}

#[cfg(feature = "tls")]
async fn secure(
    handshake: &mut Handshake<'_>,
    params: &ConnectionParameters,
    tcp: TcpStream,
) -> Result<Transport> {
    let Some(config) = params.tls_config() else {
        return Ok(Transport::Tcp(tcp));
    };
    handshake.transition(LoginState::TlsHandshaking);
    let connector = ase_tls::TlsConnector::new(config)?;
    let stream = handshake
        .step(async {
            connector
                .connect(tcp, &params.data_source)
                .await
                .map_err(Error::from)
        })
        .await?;
    Ok(Transport::Tls(Box::new(stream)))
}

#[cfg(not(feature = "tls"))]
async fn secure(
    _handshake: &mut Handshake<'_>,
    _params: &ConnectionParameters,
    tcp: TcpStream,
) -> Result<Transport> {
    Ok(Transport::Tcp(tcp))
}

fn login_record(params: &ConnectionParameters) -> LoginRecord {
    let host_name = params
        .client_host_name
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_default();
    let host_process = params
        .client_host_proc
        .clone()
        .unwrap_or_else(|| std::process::id().to_string());

    LoginRecord {
        host_name,
        user_name: params.user.clone(),
        password: params.password.clone(),
        host_process,
        app_name: params.application_name.clone(),
        server_name: params.data_source.clone(),
        language: params.language.clone().unwrap_or_default(),
        charset: params
            .charset
            .clone()
            .unwrap_or_else(|| Charset::DEFAULT_NAME.to_string()),
        packet_size: u32::from(params.packet_size.max(MIN_PACKET_SIZE as u16)),
        byte_order: ByteOrder::Little,
        ..LoginRecord::default()
    }
}

/// Read the login response up to its end.
async fn read_login_response(
    conn: &mut Connection<Transport>,
    parser: &mut TokenParser,
    events: &EventSink,
) -> Result<LoginOutcome> {
    let mut ack = None;
    let mut errors: Vec<ServerMessage> = Vec::new();
    let mut database = String::new();
    let mut language = String::new();

    loop {
        let Some(message) = conn.read_message().await? else {
            return Err(Error::ConnectionClosed);
        };
        parser.push(&message.payload);

        let mut more = false;
        while let Some(token) = parser.next_token()? {
            match token {
                Token::LoginAck(login_ack) => {
                    tracing::debug!(status = ?login_ack.status, "login ack received");
                    ack = Some(login_ack);
                }
                Token::EnvChange(changes) => {
                    for change in &changes {
                        apply_env_change(change, &mut database, &mut language, parser, conn);
                    }
                }
                Token::Capability(capabilities) => {
                    tracing::trace!(capabilities = ?capabilities, "server capabilities");
                }
                Token::Info(message) | Token::Eed(message) | Token::Error(message) => {
                    events.emit_message(&message);
                    if message.is_error() {
                        errors.push(message);
                    }
                }
                Token::Done(done) => more = done.has_more(),
                other => {
                    tracing::trace!(token = ?other.token_type(), "ignored login token");
                }
            }
        }
        parser.finish()?;

        if !more {
            break;
        }
    }

    match ack {
        Some(ack) if ack.status == LoginStatus::Succeed => Ok(LoginOutcome {
            server: ServerInfo::from(&ack),
            database,
            language,
        }),
        Some(ack) if ack.status == LoginStatus::Negotiate => Err(Error::Unsupported(
            "server requested a login security negotiation".into(),
        )),
        _ if !errors.is_empty() => Err(Error::Database(DatabaseErrors::new(errors))),
        Some(_) => Err(Error::Connection("login rejected".into())),
        None => Err(Error::Connection(
            "login response carried no acknowledgement".into(),
        )),
    }
}

/// Settings applied once the session is open.
async fn post_login(session: &mut Session, params: &ConnectionParameters) -> Result<()> {
    if let Some(database) = params.database.as_deref() {
        if !session.database().eq_ignore_ascii_case(database) {
            session.change_database(database).await?;
        }
    }
    if let Some(size) = params.text_size {
        session
            .execute_non_query(&format!("set textsize {size}"), &[])
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_record_from_params() {
        let params = ConnectionParameters::new()
            .data_source("ase01")
            .credentials("sa", "secret")
            .application_name("reports")
            .charset("utf8")
            .packet_size(2048);
        let mut params = params;
        params.client_host_name = Some("client01".into());
        params.client_host_proc = Some("4242".into());

        let record = login_record(&params);
        assert_eq!(record.host_name, "client01");
        assert_eq!(record.host_process, "4242");
        assert_eq!(record.user_name, "sa");
        assert_eq!(record.server_name, "ase01");
        assert_eq!(record.app_name, "reports");
        assert_eq!(record.charset, "utf8");
        assert_eq!(record.packet_size, 2048);
        assert_eq!(record.byte_order, ByteOrder::Little);
    }

    #[test]
    fn test_login_record_defaults() {
        let params = ConnectionParameters::new().data_source("ase01");
        let record = login_record(&params);
        assert_eq!(record.charset, Charset::DEFAULT_NAME);
        assert_eq!(record.host_process, std::process::id().to_string());
        assert_eq!(record.packet_size, MIN_PACKET_SIZE as u32);
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let params = Arc::new(
            ConnectionParameters::new()
                .data_source("127.0.0.1")
                .port(1)
                .credentials("sa", ""),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = establish(params, &cancel, EventSink::new()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
