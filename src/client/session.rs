//! Session implementation

use super::connection_string::DataSource;
use crate::connection::{Connection, Transport};
use crate::failover::{Endpoint, Established, MultiSource, SessionBuilder};
use crate::metrics::{counters, histograms};
use crate::Result;
use tracing::Instrument;

/// A live X Protocol session.
///
/// Owns the transport and the protocol session running over it. Teardown
/// rolls back an open transaction, then closes the protocol session, then
/// releases the transport.
///
/// Only [`Session::close`] guarantees that an open transaction is rolled
/// back exactly once before the transport goes away. Dropping an open
/// session spawns the same teardown on the current tokio runtime, which is
/// lost if the runtime shuts down first; outside a runtime nothing is rolled
/// back and the server discards the transaction when the socket closes.
#[derive(Debug)]
pub struct Session {
    transport: Option<Transport>,
    conn: Option<Connection>,
    database: Option<String>,
    transaction_open: bool,
}

impl Session {
    /// Connect to a single endpoint.
    ///
    /// Any failure is returned as is.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example() -> mysqlx_wire::Result<()> {
    /// use mysqlx_wire::connection::{ConnectionOptions, SslMode, TlsOptions};
    /// use mysqlx_wire::failover::Endpoint;
    /// use mysqlx_wire::Session;
    ///
    /// let options = ConnectionOptions::builder().user("app").password("secret").build();
    /// let endpoint = Endpoint::tcp("db.example.com", 33060, options)
    ///     .with_tls(TlsOptions::new(SslMode::Preferred));
    ///
    /// let session = Session::connect(&endpoint).await?;
    /// session.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let span = tracing::info_span!("session_connect", endpoint = %endpoint);
        async {
            let mut builder = SessionBuilder::new(true);
            let result = builder.visit(endpoint).await;
            Self::from_builder(builder, result)
        }
        .instrument(span)
        .await
    }

    /// Connect to the first reachable endpoint of `source`, in order.
    ///
    /// Unreachable endpoints are skipped. Authentication, encoding and TLS
    /// failures stop the search, as do TLS negotiation errors and
    /// unsupported endpoints.
    pub async fn connect_any(source: &MultiSource) -> Result<Self> {
        let span = tracing::info_span!("session_connect_any", endpoints = source.len());
        async {
            let mut builder = SessionBuilder::new(false);
            let result = builder.visit_all(source).await;
            Self::from_builder(builder, result)
        }
        .instrument(span)
        .await
    }

    /// Parse a `mysqlx://` connection string and connect.
    ///
    /// A bracketed host list fails over; a single host is connected strictly.
    pub async fn connect_str(uri: &str) -> Result<Self> {
        match DataSource::parse(uri)? {
            DataSource::Single(endpoint) => Self::connect(&endpoint).await,
            DataSource::Multi(source) => Self::connect_any(&source).await,
        }
    }

    fn from_builder(builder: SessionBuilder, visited: Result<bool>) -> Result<Self> {
        let attempts = builder.attempts();
        let established = visited.and_then(|_| builder.finish());

        match established {
            Ok(Established {
                transport,
                conn,
                database,
            }) => {
                counters::session_established(transport.kind());
                histograms::attempts_per_session(attempts);
                tracing::info!(
                    attempts,
                    tls = transport.is_tls(),
                    transport = transport.kind(),
                    "session established"
                );
                Ok(Self {
                    transport: Some(transport),
                    conn: Some(conn),
                    database,
                    transaction_open: false,
                })
            }
            Err(err) => {
                counters::session_failed(err.category());
                tracing::debug!(attempts, error = %err, "session not established");
                Err(err)
            }
        }
    }

    /// Default schema, if one was configured
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Whether a transaction is open
    pub fn has_open_transaction(&self) -> bool {
        self.transaction_open
    }

    /// Execute a statement, discarding any result set
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        let (transport, conn) = self.parts()?;
        conn.execute(transport, sql).await
    }

    /// Start a transaction
    pub async fn begin(&mut self) -> Result<()> {
        self.execute("START TRANSACTION").await?;
        self.transaction_open = true;
        Ok(())
    }

    /// Commit the open transaction
    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await?;
        self.transaction_open = false;
        Ok(())
    }

    /// Roll back the open transaction
    pub async fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").await?;
        self.transaction_open = false;
        Ok(())
    }

    /// Tear the session down, reporting the first error
    pub async fn close(mut self) -> Result<()> {
        match (self.transport.take(), self.conn.take()) {
            (Some(transport), Some(conn)) => {
                teardown(transport, conn, self.transaction_open).await
            }
            _ => Ok(()),
        }
    }

    fn parts(&mut self) -> Result<(&mut Transport, &mut Connection)> {
        match (self.transport.as_mut(), self.conn.as_mut()) {
            (Some(transport), Some(conn)) => Ok((transport, conn)),
            _ => Err(crate::Error::ConnectionClosed),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let (Some(transport), Some(conn)) = (self.transport.take(), self.conn.take()) else {
            return;
        };
        let rollback = self.transaction_open;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = teardown(transport, conn, rollback).await {
                        tracing::debug!(error = %e, "teardown of dropped session failed");
                    }
                });
            }
            Err(_) => {
                if rollback {
                    tracing::warn!("session dropped outside a tokio runtime, open transaction not rolled back");
                }
                drop(conn);
                drop(transport);
            }
        }
    }
}

/// Roll back (if asked), close the protocol session, then close and release
/// the transport.
///
/// Every step runs even when an earlier one fails.
async fn teardown(mut transport: Transport, mut conn: Connection, rollback: bool) -> Result<()> {
    let mut result = Ok(());

    if rollback {
        counters::teardown_rollback();
        tracing::debug!("rolling back open transaction");
        result = conn.execute(&mut transport, "ROLLBACK").await;
    }

    let closed = conn.close(&mut transport).await;
    let disconnected = conn.disconnect(&mut transport).await;

    // The peer may already be gone after Connection.Close
    if let Err(e) = transport.shutdown().await {
        tracing::debug!(error = %e, "transport shutdown failed");
    }
    drop(transport);

    result.and(closed).and(disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::Error;

    #[tokio::test]
    async fn test_legacy_endpoint_is_unsupported() {
        let err = Session::connect(&Endpoint::legacy("localhost", 3306))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_connect_str_rejects_unknown_scheme() {
        let err = Session::connect_str("postgres://localhost/db")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_source_is_unreachable() {
        let err = Session::connect_any(&MultiSource::new()).await.unwrap_err();
        assert!(matches!(err, Error::Unreachable { attempts: 0 }));
    }

    #[tokio::test]
    async fn test_single_refused_endpoint_reports_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::tcp("127.0.0.1", port, ConnectionOptions::new());
        let err = Session::connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
