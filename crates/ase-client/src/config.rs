//! Connection parameters.
//!
//! Parameters are parsed once from an ADO-style connection string into an
//! immutable [`ConnectionParameters`] snapshot. Keys are case-insensitive,
//! inner spaces are ignored (`Max Pool Size` and `maxpoolsize` are the same
//! key) and several aliases are accepted.

use std::path::PathBuf;
use std::time::Duration;

use tds5_protocol::packet::{MAX_PACKET_SIZE, MIN_PACKET_SIZE};

use crate::error::{Error, Result};

/// Default ASE listener port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default `LoginTimeout`.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default `Max Pool Size`.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// Configuration for one logical database endpoint and credential set.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectionParameters {
    /// Server host name or address.
    pub data_source: String,
    /// Server port.
    pub port: u16,
    /// Database to switch to after login.
    pub database: Option<String>,
    /// Login name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Client charset requested at login, e.g. `utf8`.
    pub charset: Option<String>,
    /// Whether sessions are pooled.
    pub pooling: bool,
    /// Upper bound on sessions per pool.
    pub max_pool_size: u32,
    /// Floor of sessions a pool keeps after first use.
    pub min_pool_size: u32,
    /// Application name sent at login.
    pub application_name: String,
    /// Client host name sent at login.
    pub client_host_name: Option<String>,
    /// Client process id sent at login.
    pub client_host_proc: Option<String>,
    /// Idle sessions older than this are closed rather than reused.
    pub connection_idle_timeout: Option<Duration>,
    /// Sessions older than this are closed rather than reused.
    pub connection_lifetime: Option<Duration>,
    /// Bound on connect, TLS, login and pool waits.
    pub login_timeout: Duration,
    /// Whether idle sessions are pinged before reuse.
    pub ping_server: bool,
    /// Requested packet size.
    pub packet_size: u16,
    /// `set textsize` value applied after login.
    pub text_size: Option<u32>,
    /// Password encryption level.
    pub encrypt_password: u8,
    /// Whether to wrap the socket in TLS.
    pub encryption: bool,
    /// PEM file of trusted certificates for TLS.
    pub trusted_file: Option<PathBuf>,
    /// Language requested at login.
    pub language: Option<String>,
    /// TLS settings that override `trusted_file`, such as a trust callback.
    #[cfg(feature = "tls")]
    pub tls: Option<ase_tls::TlsConfig>,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            port: DEFAULT_PORT,
            database: None,
            user: String::new(),
            password: String::new(),
            charset: None,
            pooling: true,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: 0,
            application_name: String::from("ase-client"),
            client_host_name: None,
            client_host_proc: None,
            connection_idle_timeout: None,
            connection_lifetime: None,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            ping_server: true,
            packet_size: MIN_PACKET_SIZE as u16,
            text_size: None,
            encrypt_password: 0,
            encryption: false,
            trusted_file: None,
            language: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl ConnectionParameters {
    /// Create parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a connection string.
    ///
    /// ```rust
    /// use ase_client::ConnectionParameters;
    ///
    /// let params = ConnectionParameters::parse(
    ///     "Data Source=ase01,5000;Db=pubs2;Uid=sa;Pwd=secret;Max Pool Size=10",
    /// )
    /// .unwrap();
    /// assert_eq!(params.port, 5000);
    /// assert_eq!(params.max_pool_size, 10);
    /// ```
    pub fn parse(conn_str: &str) -> Result<Self> {
        let mut params = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = canonical_key(key);
            let value = value.trim();

            match key.as_str() {
                "datasource" | "server" | "host" | "address" | "addr" => {
                    let (host, port) = split_host_port(value)?;
                    params.data_source = host.to_string();
                    if let Some(port) = port {
                        params.port = port;
                    }
                }
                "port" => params.port = parse_number(&key, value)?,
                "database" | "db" | "initialcatalog" => {
                    params.database = non_empty(value);
                }
                "uid" | "userid" | "user" => params.user = value.to_string(),
                "pwd" | "password" => params.password = value.to_string(),
                "charset" => params.charset = non_empty(value),
                "pooling" => params.pooling = parse_bool(&key, value)?,
                "maxpoolsize" => params.max_pool_size = parse_number(&key, value)?,
                "minpoolsize" => params.min_pool_size = parse_number(&key, value)?,
                "applicationname" | "app" => params.application_name = value.to_string(),
                "clienthostname" => params.client_host_name = non_empty(value),
                "clienthostproc" => params.client_host_proc = non_empty(value),
                "connectionidletimeout" => {
                    params.connection_idle_timeout = parse_seconds(&key, value)?;
                }
                "connectionlifetime" => {
                    params.connection_lifetime = parse_seconds(&key, value)?;
                }
                "logintimeout" | "connecttimeout" | "connectiontimeout" => {
                    params.login_timeout = parse_seconds(&key, value)?.unwrap_or(Duration::MAX);
                }
                "pingserver" => params.ping_server = parse_bool(&key, value)?,
                "packetsize" => params.packet_size = parse_number(&key, value)?,
                "textsize" => {
                    let size: u32 = parse_number(&key, value)?;
                    params.text_size = (size > 0).then_some(size);
                }
                "encryptpassword" => params.encrypt_password = parse_number(&key, value)?,
                "encryption" | "ssl" => params.encryption = parse_bool(&key, value)?,
                "trustedfile" => params.trusted_file = non_empty(value).map(PathBuf::from),
                "language" => params.language = non_empty(value),
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = %key, "ignoring unknown connection string option");
                }
            }
        }

        params.validate()?;
        Ok(params)
    }

    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.data_source.is_empty() {
            return Err(Error::Config("Data Source is required".into()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("Uid is required".into()));
        }
        if self.max_pool_size == 0 {
            return Err(Error::Config("Max Pool Size must be greater than 0".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Config(
                "Min Pool Size cannot be greater than Max Pool Size".into(),
            ));
        }
        let packet_size = usize::from(self.packet_size);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(Error::Config(format!(
                "PacketSize must be between {MIN_PACKET_SIZE} and {MAX_PACKET_SIZE}"
            )));
        }
        if self.encrypt_password != 0 {
            return Err(Error::Config(format!(
                "EncryptPassword={} is not supported",
                self.encrypt_password
            )));
        }
        #[cfg(not(feature = "tls"))]
        if self.encryption {
            return Err(Error::Config(
                "Encryption requires the `tls` feature".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` for the TCP connection.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.data_source, self.port)
    }

    /// Pool identity: a canonical rendering of every setting.
    ///
    /// Connection strings that differ only in key spelling, alias, case,
    /// whitespace or order produce the same identity.
    #[must_use]
    pub fn identity(&self) -> String {
        fn opt<T: ToString>(value: Option<&T>) -> String {
            value.map(ToString::to_string).unwrap_or_default()
        }
        fn secs(value: Option<Duration>) -> String {
            value.map(|d| d.as_secs().to_string()).unwrap_or_default()
        }

        let mut pairs = [
            ("applicationname", self.application_name.clone()),
            ("charset", opt(self.charset.as_ref())),
            ("clienthostname", opt(self.client_host_name.as_ref())),
            ("clienthostproc", opt(self.client_host_proc.as_ref())),
            ("connectionidletimeout", secs(self.connection_idle_timeout)),
            ("connectionlifetime", secs(self.connection_lifetime)),
            ("database", opt(self.database.as_ref())),
            ("datasource", self.data_source.to_ascii_lowercase()),
            ("encryption", self.encryption.to_string()),
            ("encryptpassword", self.encrypt_password.to_string()),
            ("language", opt(self.language.as_ref())),
            ("logintimeout", self.login_timeout.as_secs().to_string()),
            ("maxpoolsize", self.max_pool_size.to_string()),
            ("minpoolsize", self.min_pool_size.to_string()),
            ("packetsize", self.packet_size.to_string()),
            ("pingserver", self.ping_server.to_string()),
            ("pooling", self.pooling.to_string()),
            ("port", self.port.to_string()),
            ("pwd", self.password.clone()),
            ("textsize", opt(self.text_size.as_ref())),
            (
                "trustedfile",
                self.trusted_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("uid", self.user.clone()),
        ];
        pairs.sort_by_key(|(key, _)| *key);

        pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// TLS configuration for this endpoint, if encryption is enabled.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn tls_config(&self) -> Option<ase_tls::TlsConfig> {
        if !self.encryption {
            return None;
        }
        let config = match (&self.tls, &self.trusted_file) {
            (Some(config), _) => config.clone(),
            (None, Some(path)) => ase_tls::TlsConfig::new().trusted_file(path),
            (None, None) => ase_tls::TlsConfig::new(),
        };
        Some(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn data_source(mut self, host: impl Into<String>) -> Self {
        self.data_source = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the client charset.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    /// Set the pool bounds.
    #[must_use]
    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the idle timeout for pooled sessions.
    #[must_use]
    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum lifetime of pooled sessions.
    #[must_use]
    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = Some(lifetime);
        self
    }

    /// Set the login timeout.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Enable or disable the pre-reuse ping.
    #[must_use]
    pub fn ping_server(mut self, enabled: bool) -> Self {
        self.ping_server = enabled;
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the `textsize` applied after login.
    #[must_use]
    pub fn text_size(mut self, size: u32) -> Self {
        self.text_size = Some(size);
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub fn encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    /// Trust the certificates in a PEM file.
    #[must_use]
    pub fn trusted_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_file = Some(path.into());
        self
    }

    /// Use explicit TLS settings, such as a trust callback.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn tls(mut self, config: ase_tls::TlsConfig) -> Self {
        self.encryption = true;
        self.tls = Some(config);
        self
    }
}

fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn split_host_port(value: &str) -> Result<(&str, Option<u16>)> {
    match value.rsplit_once(',').or_else(|| value.rsplit_once(':')) {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
            Ok((host.trim(), Some(port)))
        }
        None => Ok((value, None)),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid value for {key}: {value}"))),
    }
}

/// Seconds, where 0 means "no limit".
fn parse_seconds(key: &str, value: &str) -> Result<Option<Duration>> {
    let secs: u64 = parse_number(key, value)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let params = ConnectionParameters::parse(
            "Data Source=ase01;Port=5001;Database=pubs2;Uid=sa;Pwd=secret;Charset=utf8",
        )
        .unwrap();

        assert_eq!(params.data_source, "ase01");
        assert_eq!(params.port, 5001);
        assert_eq!(params.database.as_deref(), Some("pubs2"));
        assert_eq!(params.user, "sa");
        assert_eq!(params.password, "secret");
        assert_eq!(params.charset.as_deref(), Some("utf8"));
        assert_eq!(params.address(), "ase01:5001");
    }

    #[test]
    fn test_aliases_and_host_port_forms() {
        let comma = ConnectionParameters::parse("Server=db1,6000;User ID=bob").unwrap();
        assert_eq!((comma.data_source.as_str(), comma.port), ("db1", 6000));

        let colon = ConnectionParameters::parse("host=db1:6001;user=bob").unwrap();
        assert_eq!((colon.data_source.as_str(), colon.port), ("db1", 6001));

        let catalog = ConnectionParameters::parse("Addr=db1;UserID=bob;Initial Catalog=x").unwrap();
        assert_eq!(catalog.database.as_deref(), Some("x"));
    }

    #[test]
    fn test_pool_and_timeout_settings() {
        let params = ConnectionParameters::parse(
            "Data Source=h;Uid=u;Pooling=false;Max Pool Size=5;Min Pool Size=2;\
             ConnectionIdleTimeout=30;ConnectionLifetime=0;LoginTimeout=3;PingServer=no",
        )
        .unwrap();

        assert!(!params.pooling);
        assert_eq!(params.max_pool_size, 5);
        assert_eq!(params.min_pool_size, 2);
        assert_eq!(params.connection_idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(params.connection_lifetime, None);
        assert_eq!(params.login_timeout, Duration::from_secs(3));
        assert!(!params.ping_server);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let params = ConnectionParameters::parse("Data Source=h;Uid=u;AnsiNull=1").unwrap();
        assert_eq!(params.data_source, "h");
    }

    #[test]
    fn test_validation_failures() {
        for conn_str in [
            "Uid=u",
            "Data Source=h",
            "Data Source=h;Uid=u;Max Pool Size=0",
            "Data Source=h;Uid=u;Min Pool Size=10;Max Pool Size=5",
            "Data Source=h;Uid=u;PacketSize=100",
            "Data Source=h;Uid=u;EncryptPassword=1",
            "Data Source=h;Uid=u;Pooling=maybe",
            "Data Source=h,notaport;Uid=u",
            "Data Source",
        ] {
            let result = ConnectionParameters::parse(conn_str);
            assert!(
                matches!(result, Err(Error::Config(_))),
                "expected config error for {conn_str:?}"
            );
        }
    }

    #[test]
    fn test_identity_normalizes_spelling() {
        let a = ConnectionParameters::parse("Data Source=ASE01;Port=5000;Uid=sa;Pwd=x;Max Pool Size=4")
            .unwrap();
        let b = ConnectionParameters::parse(" maxpoolsize = 4 ; server=ase01,5000;user id=sa;password=x;")
            .unwrap();
        let c = ConnectionParameters::parse("Data Source=ASE01;Port=5000;Uid=sa;Pwd=y;Max Pool Size=4")
            .unwrap();

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_builder_validates() {
        let params = ConnectionParameters::new()
            .data_source("ase01")
            .credentials("sa", "secret")
            .pool_size(1, 4)
            .connection_idle_timeout(Duration::from_secs(60));
        assert!(params.validate().is_ok());
        assert_eq!(params.max_pool_size, 4);
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_tls_config_from_trusted_file() {
        let params =
            ConnectionParameters::parse("Data Source=h;Uid=u;ssl=true;TrustedFile=/opt/trusted.txt")
                .unwrap();
        let tls = params.tls_config().unwrap();
        assert!(matches!(tls.trust, ase_tls::TrustMode::TrustedFile(_)));

        let plain = ConnectionParameters::parse("Data Source=h;Uid=u").unwrap();
        assert!(plain.tls_config().is_none());
    }
}
