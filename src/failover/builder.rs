//! Failover state machine

use super::attempt::{connect_attempt, ConnectOutcome};
use super::source::{Endpoint, MultiSource};
use crate::connection::{negotiate_tls, Connection, ConnectionOptions, Transport};
use crate::metrics::counters;
use crate::{Error, Result};

/// A connected and started protocol session with its transport
#[derive(Debug)]
pub struct Established {
    /// Final transport (TLS-wrapped when negotiated)
    pub transport: Transport,
    /// Started protocol session
    pub conn: Connection,
    /// Default schema of the session
    pub database: Option<String>,
}

/// Visits endpoints in order until one yields a session.
///
/// A builder serves exactly one failover attempt. Only transport connect
/// failures go through classification; errors from TLS negotiation, session
/// startup and unsupported endpoint kinds abort the attempt as they are.
#[derive(Debug)]
pub struct SessionBuilder {
    strict: bool,
    attempts: usize,
    last_error: Option<Error>,
    established: Option<Established>,
}

impl SessionBuilder {
    /// `strict` builders treat every connect failure as fatal
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            attempts: 0,
            last_error: None,
            established: None,
        }
    }

    /// Number of connect attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Most recent recoverable failure
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Whether a session has been established
    pub fn is_established(&self) -> bool {
        self.established.is_some()
    }

    /// Try one endpoint.
    ///
    /// `Ok(true)` when a session was built, `Ok(false)` after a recoverable
    /// failure, `Err` when the whole attempt must stop.
    pub async fn visit(&mut self, endpoint: &Endpoint) -> Result<bool> {
        if self.established.is_some() {
            return Err(Error::InvalidState {
                expected: "no established session".into(),
                actual: "session already established".into(),
            });
        }

        tracing::debug!(endpoint = %endpoint, attempt = self.attempts + 1, "trying endpoint");

        match endpoint {
            Endpoint::Network {
                host,
                port,
                options,
                tls,
            } => {
                let connect = Transport::connect_tcp(host, *port);
                let Some(transport) = self.connect(endpoint, connect, options).await? else {
                    return Ok(false);
                };

                let transport = match tls {
                    Some(tls) => negotiate_tls(transport, host, tls).await?.into_transport(),
                    None => transport,
                };
                self.start(transport, options).await?;
                Ok(true)
            }
            Endpoint::Local { path, options } => {
                let connect = Transport::connect_unix(path);
                let Some(transport) = self.connect(endpoint, connect, options).await? else {
                    return Ok(false);
                };

                self.start(transport, options).await?;
                Ok(true)
            }
            Endpoint::LegacyNetwork { .. } => Err(Error::Unsupported("not supported".into())),
        }
    }

    /// Visit every endpoint of `source` in order, stopping at the first
    /// session or the first fatal error
    pub async fn visit_all(&mut self, source: &MultiSource) -> Result<bool> {
        for endpoint in source {
            if self.visit(endpoint).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hand over the established session, or explain why there is none.
    ///
    /// With no session, a single attempt re-raises its recorded error;
    /// otherwise the result is `Error::Unreachable`.
    pub fn finish(self) -> Result<Established> {
        if let Some(established) = self.established {
            return Ok(established);
        }

        counters::failover_exhausted();
        match (self.attempts, self.last_error) {
            (1, Some(err)) => Err(err),
            (attempts, _) => Err(Error::Unreachable { attempts }),
        }
    }

    async fn connect<F>(
        &mut self,
        endpoint: &Endpoint,
        connect: F,
        options: &ConnectionOptions,
    ) -> Result<Option<Transport>>
    where
        F: std::future::Future<Output = Result<Transport>>,
    {
        self.attempts += 1;
        match connect_attempt(endpoint.kind(), connect, options.connect_timeout, self.strict).await
        {
            ConnectOutcome::Connected(transport) => Ok(Some(transport)),
            ConnectOutcome::Retryable(err) => {
                tracing::warn!(endpoint = %endpoint, error = %err, "endpoint unreachable, trying next");
                self.last_error = Some(err);
                Ok(None)
            }
            ConnectOutcome::Fatal(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn start(&mut self, mut transport: Transport, options: &ConnectionOptions) -> Result<()> {
        let mut conn = Connection::new();
        conn.startup(&mut transport, options).await?;

        self.established = Some(Established {
            transport,
            conn,
            database: options.database.clone(),
        });
        Ok(())
    }
}
