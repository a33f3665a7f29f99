//! Protocol session and per-endpoint connection options

use super::state::ConnectionState;
use super::transport::Transport;
use crate::protocol::{decode_message, encode_message, ClientMessage, ServerMessage};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::time::Duration;
use tracing::Instrument;

/// Authentication mechanism
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN over TLS or local sockets, SHA256_MEMORY over plain TCP
    #[default]
    Auto,
    /// Cleartext password (only safe on encrypted or local transports)
    Plain,
    /// Challenge/response against the server's cached credentials
    Sha256Memory,
}

impl AuthMethod {
    fn resolve(self, transport: &Transport) -> AuthMethod {
        match self {
            AuthMethod::Auto if transport.is_tls() || matches!(transport, Transport::Unix(_)) => {
                AuthMethod::Plain
            }
            AuthMethod::Auto => AuthMethod::Sha256Memory,
            other => other,
        }
    }

    fn mechanism(self) -> &'static str {
        match self {
            AuthMethod::Plain | AuthMethod::Auto => "PLAIN",
            AuthMethod::Sha256Memory => "SHA256_MEMORY",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Plain => write!(f, "plain"),
            Self::Sha256Memory => write!(f, "sha256_memory"),
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "plain" => Ok(Self::Plain),
            "sha256_memory" | "sha256-memory" => Ok(Self::Sha256Memory),
            _ => Err(Error::Config(format!(
                "invalid auth '{}': expected auto, plain, or sha256_memory",
                s
            ))),
        }
    }
}

/// Per-endpoint connection options
///
/// Use `ConnectionOptions::builder()` for the fluent form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Default schema for the session
    #[serde(default)]
    pub database: Option<String>,
    /// Username; authentication is skipped when unset
    #[serde(default)]
    pub user: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Authentication mechanism
    #[serde(default)]
    pub auth: AuthMethod,
    /// Transport connect timeout
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
}

impl ConnectionOptions {
    /// Options with every field unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```
    /// use mysqlx_wire::connection::ConnectionOptions;
    /// use std::time::Duration;
    ///
    /// let options = ConnectionOptions::builder()
    ///     .database("shop")
    ///     .user("app")
    ///     .password("secret")
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .build();
    /// assert_eq!(options.database.as_deref(), Some("shop"));
    /// ```
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }
}

/// Builder for `ConnectionOptions`
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    /// Set the default schema
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.options.database = Some(database.into());
        self
    }

    /// Set the username
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Some(user.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    /// Set the authentication mechanism
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.options.auth = auth;
        self
    }

    /// Set the transport connect timeout
    ///
    /// Default: None (OS default)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.options.connect_timeout = Some(duration);
        self
    }

    /// Build the options
    pub fn build(self) -> ConnectionOptions {
        self.options
    }
}

/// X Protocol session state bound to a transport.
///
/// The session does not own its transport: the owner passes it into every
/// call, which keeps the transport and the session separately releasable.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    read_buf: BytesMut,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a session for a freshly connected transport
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    /// Get current session state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether bytes beyond the last decoded message are buffered
    pub(crate) fn has_buffered_data(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// Authenticate (when a user is configured) and make the session ready
    pub async fn startup(
        &mut self,
        transport: &mut Transport,
        options: &ConnectionOptions,
    ) -> Result<()> {
        let database = options.database.clone().unwrap_or_default();
        async {
            match &options.user {
                Some(user) => {
                    self.state.transition(ConnectionState::Authenticating)?;
                    let method = options.auth.resolve(transport);
                    let password = options.password.as_deref().unwrap_or_default();
                    self.authenticate(transport, method, &database, user, password)
                        .await?;
                }
                None => {
                    tracing::debug!("no user configured, skipping authentication");
                }
            }

            self.state.transition(ConnectionState::Ready)?;
            tracing::debug!("session ready");
            Ok(())
        }
        .instrument(tracing::debug_span!(
            "startup",
            user = options.user.as_deref().unwrap_or_default(),
            database = %database
        ))
        .await
    }

    async fn authenticate(
        &mut self,
        transport: &mut Transport,
        method: AuthMethod,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<()> {
        let auth_data = match method {
            AuthMethod::Sha256Memory => Vec::new(),
            _ => auth_payload(database, user, password.as_bytes()),
        };

        tracing::debug!(mechanism = method.mechanism(), "starting authentication");
        let start = ClientMessage::AuthenticateStart {
            mechanism: method.mechanism().to_string(),
            auth_data,
        };
        self.send_message(transport, &start).await?;

        let mut challenged = false;
        loop {
            match self.receive_reply(transport).await? {
                ServerMessage::AuthenticateContinue { auth_data: nonce }
                    if method == AuthMethod::Sha256Memory && !challenged =>
                {
                    challenged = true;
                    let scramble = sha256_memory_scramble(password, &nonce);
                    let reply = ClientMessage::AuthenticateContinue {
                        auth_data: auth_payload(database, user, scramble.as_bytes()),
                    };
                    self.send_message(transport, &reply).await?;
                }
                ServerMessage::AuthenticateOk => {
                    tracing::debug!("authentication successful");
                    return Ok(());
                }
                ServerMessage::Error(err) => {
                    return Err(Error::Authentication(err.to_string()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during authentication: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Execute a statement and discard any result set
    pub async fn execute(&mut self, transport: &mut Transport, sql: &str) -> Result<()> {
        self.state.transition(ConnectionState::Executing)?;

        let msg = ClientMessage::StmtExecute {
            stmt: sql.to_string(),
        };
        self.send_message(transport, &msg).await?;

        loop {
            match self.receive_reply(transport).await? {
                ServerMessage::StmtExecuteOk => break,
                ServerMessage::Error(err) => {
                    self.state.transition(ConnectionState::Ready)?;
                    return Err(Error::Server(err));
                }
                ServerMessage::Other { .. } => continue, // result set frames
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during statement execution: {:?}",
                        other
                    )));
                }
            }
        }

        self.state.transition(ConnectionState::Ready)?;
        Ok(())
    }

    /// Close the session (the transport stays with its owner)
    pub async fn close(&mut self, transport: &mut Transport) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state.transition(ConnectionState::Closed)?;

        self.send_message(transport, &ClientMessage::SessionClose)
            .await?;
        match self.receive_reply(transport).await? {
            ServerMessage::Ok(_) => Ok(()),
            ServerMessage::Error(err) => Err(Error::Server(err)),
            other => Err(Error::Protocol(format!(
                "unexpected reply to session close: {:?}",
                other
            ))),
        }
    }

    /// Ask the server to end the connection, consuming the session.
    ///
    /// The server may hang up without replying; that counts as success.
    pub async fn disconnect(mut self, transport: &mut Transport) -> Result<()> {
        self.send_message(transport, &ClientMessage::ConnectionClose)
            .await?;
        match self.receive_reply(transport).await {
            Ok(ServerMessage::Ok(_)) | Err(Error::ConnectionClosed) => Ok(()),
            Ok(ServerMessage::Error(err)) => Err(Error::Server(err)),
            Ok(other) => Err(Error::Protocol(format!(
                "unexpected reply to connection close: {:?}",
                other
            ))),
            Err(e) => Err(e),
        }
    }

    /// Send a client message
    pub(crate) async fn send_message(
        &mut self,
        transport: &mut Transport,
        msg: &ClientMessage,
    ) -> Result<()> {
        let buf = encode_message(msg).map_err(|e| Error::Protocol(e.to_string()))?;
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Receive the next message that is not a notice
    pub(crate) async fn receive_reply(&mut self, transport: &mut Transport) -> Result<ServerMessage> {
        loop {
            match self.receive_message(transport).await? {
                ServerMessage::Notice => {
                    tracing::trace!("skipping notice");
                }
                msg => return Ok(msg),
            }
        }
    }

    /// Receive a server message
    async fn receive_message(&mut self, transport: &mut Transport) -> Result<ServerMessage> {
        loop {
            match decode_message(&self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            // Need more data
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

/// `schema \0 user \0 secret`
fn auth_payload(database: &str, user: &str, secret: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(database.len() + user.len() + secret.len() + 2);
    data.extend_from_slice(database.as_bytes());
    data.push(0);
    data.extend_from_slice(user.as_bytes());
    data.push(0);
    data.extend_from_slice(secret);
    data
}

/// `hex(SHA256(pwd) XOR SHA256(SHA256(SHA256(pwd)) || nonce))`, empty for an
/// empty password
fn sha256_memory_scramble(password: &str, nonce: &[u8]) -> String {
    if password.is_empty() {
        return String::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(nonce);
    let stage3 = hasher.finalize();

    let scramble: Vec<u8> = stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect();
    hex::encode_upper(scramble)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_options_builder() {
        let options = ConnectionOptions::builder()
            .database("mydb")
            .user("myuser")
            .password("mypass")
            .auth(AuthMethod::Plain)
            .connect_timeout(Duration::from_secs(10))
            .build();

        assert_eq!(options.database, Some("mydb".to_string()));
        assert_eq!(options.user, Some("myuser".to_string()));
        assert_eq!(options.password, Some("mypass".to_string()));
        assert_eq!(options.auth, AuthMethod::Plain);
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_connection_options_defaults() {
        let options = ConnectionOptions::new();
        assert!(options.database.is_none());
        assert!(options.user.is_none());
        assert!(options.connect_timeout.is_none());
        assert_eq!(options.auth, AuthMethod::Auto);
    }

    #[test]
    fn test_connection_options_deserialize() {
        let options: ConnectionOptions =
            serde_json::from_str(r#"{"database":"shop","user":"app","auth":"sha256_memory"}"#)
                .unwrap();
        assert_eq!(options.database.as_deref(), Some("shop"));
        assert_eq!(options.auth, AuthMethod::Sha256Memory);
        assert!(options.password.is_none());
    }

    #[test]
    fn test_auth_method_from_str() {
        assert_eq!("PLAIN".parse::<AuthMethod>().unwrap(), AuthMethod::Plain);
        assert_eq!(
            "sha256-memory".parse::<AuthMethod>().unwrap(),
            AuthMethod::Sha256Memory
        );
        assert!("mysql41".parse::<AuthMethod>().is_err());
    }

    #[test]
    fn test_auth_payload_layout() {
        assert_eq!(auth_payload("db", "u", b"pw"), b"db\0u\0pw".to_vec());
        assert_eq!(auth_payload("", "u", b""), b"\0u\0".to_vec());
    }

    #[test]
    fn test_sha256_memory_scramble() {
        let scramble = sha256_memory_scramble("secret", b"01234567890123456789");
        assert_eq!(
            scramble,
            "1A2DA2573C2FAA367E2AFDDB54CDFD11A95ED22EEF0167151196A6FC8E3D3813"
        );
        assert!(scramble
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));

        // Depends on the nonce
        assert_ne!(scramble, sha256_memory_scramble("secret", b"98765432109876543210"));
        assert!(sha256_memory_scramble("", b"nonce").is_empty());
    }

    #[test]
    fn test_new_connection_is_initial() {
        let conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Initial);
        assert!(!conn.has_buffered_data());
    }
}
