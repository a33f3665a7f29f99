//! TLS capability negotiation
//!
//! The client asks for the `tls` capability on the plaintext connection and
//! upgrades the transport once the server acknowledges. Under
//! `ssl_mode = preferred` the server may decline, and the session continues in
//! plaintext.

use super::conn::Connection;
use super::tls::{SslMode, TlsConfig, TlsOptions};
use super::transport::Transport;
use crate::metrics::{counters, labels};
use crate::protocol::constants::TLS_CAPABILITY;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

/// Result of a completed negotiation. Each variant carries the transport the
/// session continues on.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// `ssl_mode = disabled`, nothing was exchanged
    Skipped(Transport),
    /// Server agreed and the TLS handshake succeeded
    UpgradeAccepted(Transport),
    /// Server declined under `ssl_mode = preferred`
    UpgradeDeclinedByServer(Transport),
}

impl NegotiationOutcome {
    /// Take the transport out of the outcome
    pub fn into_transport(self) -> Transport {
        match self {
            NegotiationOutcome::Skipped(t)
            | NegotiationOutcome::UpgradeAccepted(t)
            | NegotiationOutcome::UpgradeDeclinedByServer(t) => t,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NegotiationOutcome::Skipped(_) => labels::OUTCOME_SKIPPED,
            NegotiationOutcome::UpgradeAccepted(_) => labels::OUTCOME_ACCEPTED,
            NegotiationOutcome::UpgradeDeclinedByServer(_) => labels::OUTCOME_DECLINED,
        }
    }
}

/// Negotiate a TLS upgrade over a connected plaintext transport.
///
/// Invalid options fail before any I/O. Any error reply other than the
/// decline signature under `preferred` fails the negotiation, and so does a
/// failed handshake; in both cases the transport is dropped.
pub async fn negotiate_tls(
    transport: Transport,
    hostname: &str,
    options: &TlsOptions,
) -> Result<NegotiationOutcome> {
    let result = negotiate(transport, hostname, options).await;
    match &result {
        Ok(outcome) => counters::tls_negotiated(outcome.label()),
        Err(_) => counters::tls_negotiated(labels::OUTCOME_ABORTED),
    }
    result
}

async fn negotiate(
    mut transport: Transport,
    hostname: &str,
    options: &TlsOptions,
) -> Result<NegotiationOutcome> {
    options.validate()?;

    if options.ssl_mode == SslMode::Disabled {
        tracing::debug!("ssl-mode disabled, skipping TLS negotiation");
        return Ok(NegotiationOutcome::Skipped(transport));
    }

    if transport.is_tls() || !matches!(transport, Transport::Tcp(_)) {
        return Err(Error::Unsupported(format!(
            "TLS negotiation needs a plain TCP transport, got {}",
            transport.kind()
        )));
    }

    // Scratch protocol state, discarded once the reply is in
    let mut proto = Connection::new();
    let request = ClientMessage::CapabilitiesSet {
        capabilities: vec![(TLS_CAPABILITY.to_string(), true)],
    };
    proto.send_message(&mut transport, &request).await?;

    match proto.receive_reply(&mut transport).await? {
        ServerMessage::Ok(_) => {}
        ServerMessage::Error(err)
            if err.is_capability_decline() && options.ssl_mode == SslMode::Preferred =>
        {
            tracing::debug!(code = err.code, "server declined TLS, continuing in plaintext");
            return Ok(NegotiationOutcome::UpgradeDeclinedByServer(transport));
        }
        ServerMessage::Error(err) => {
            tracing::debug!(code = err.code, ssl_mode = %options.ssl_mode, "TLS capability rejected");
            return Err(Error::Server(err));
        }
        other => {
            return Err(Error::Protocol(format!(
                "unexpected reply to capability request: {:?}",
                other
            )));
        }
    }

    if proto.has_buffered_data() {
        return Err(Error::Protocol(
            "unexpected data after capability reply".into(),
        ));
    }

    tracing::debug!("server accepted TLS, upgrading connection");
    let tls_config = TlsConfig::from_options(options)?;
    // TODO: a failed handshake aborts the whole failover list; try the next
    // endpoint once network failures can be told apart from certificate rejections
    let transport = transport.upgrade_to_tls(&tls_config, hostname).await?;
    tracing::info!(ssl_mode = %options.ssl_mode, "TLS connection established");

    Ok(NegotiationOutcome::UpgradeAccepted(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::server;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn error_frame(code: u32, sql_state: &str) -> Vec<u8> {
        let mut payload = vec![0x10];
        let mut v = code;
        while v >= 0x80 {
            payload.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        payload.push(v as u8);
        payload.push(0x22);
        payload.push(sql_state.len() as u8);
        payload.extend_from_slice(sql_state.as_bytes());

        let mut frame = ((payload.len() + 1) as u32).to_le_bytes().to_vec();
        frame.push(server::ERROR);
        frame.extend(payload);
        frame
    }

    /// Serve one connection: read one frame, answer with `reply`, report
    /// whether anything was received.
    async fn serve_once(reply: Vec<u8>) -> (u16, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n > 0 {
                socket.write_all(&reply).await.unwrap();
            }
            n
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_disabled_skips_without_io() {
        let (port, server) = serve_once(Vec::new()).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let outcome = negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::Disabled))
            .await
            .unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Skipped(_)));

        drop(outcome);
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_io() {
        let (port, server) = serve_once(Vec::new()).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let err = negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::VerifyCa))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decline_under_preferred_keeps_plain_transport() {
        let (port, _server) = serve_once(error_frame(5001, "HY000")).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let outcome = negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::Preferred))
            .await
            .unwrap();
        match outcome {
            NegotiationOutcome::UpgradeDeclinedByServer(t) => assert!(!t.is_tls()),
            other => panic!("expected decline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decline_under_required_is_an_error() {
        let (port, _server) = serve_once(error_frame(5001, "HY000")).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let err = negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::Required))
            .await
            .unwrap_err();
        match err {
            Error::Server(e) => assert_eq!(e.code, 5001),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_error_under_preferred_is_an_error() {
        let (port, _server) = serve_once(error_frame(5002, "HY000")).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let result =
            negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::Preferred)).await;
        assert!(matches!(result, Err(Error::Server(_))));
    }

    #[tokio::test]
    async fn test_accepted_then_failed_handshake_propagates() {
        // Ok reply, then the server hangs up instead of speaking TLS
        let ok = vec![0x01, 0x00, 0x00, 0x00, server::OK];
        let (port, _server) = serve_once(ok).await;
        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();

        let err = negotiate_tls(transport, "127.0.0.1", &TlsOptions::new(SslMode::Required))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }
}
