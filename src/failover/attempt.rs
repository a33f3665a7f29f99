//! A single classified connect attempt

use crate::connection::Transport;
use crate::error::Classification;
use crate::metrics::{counters, histograms};
use crate::{Error, Result};
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

/// Result of connecting one transport
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Transport is connected and handed to the caller
    Connected(Transport),
    /// Failure that lets the caller move on to the next endpoint
    Retryable(Error),
    /// Failure that ends the whole failover attempt
    Fatal(Error),
}

/// Run `connect`, bounded by `timeout`, and classify any failure.
///
/// In `strict` mode every failure is fatal. A timeout is reported as a
/// `TimedOut` I/O error and is therefore recoverable otherwise. Whatever
/// `connect` had built before failing is dropped here.
pub async fn connect_attempt<F>(
    kind: &'static str,
    connect: F,
    timeout: Option<Duration>,
    strict: bool,
) -> ConnectOutcome
where
    F: Future<Output = Result<Transport>>,
{
    counters::connect_attempted(kind);
    let start = Instant::now();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {}ms", limit.as_millis()),
            ))),
        },
        None => connect.await,
    };

    histograms::connect_duration(kind, start.elapsed().as_millis() as u64);

    match result {
        Ok(transport) => ConnectOutcome::Connected(transport),
        Err(err) => {
            let classification = if strict {
                Classification::Fatal
            } else {
                err.classification()
            };
            counters::connect_failed(kind, classification);

            match classification {
                Classification::Fatal => ConnectOutcome::Fatal(err),
                Classification::Recoverable => ConnectOutcome::Retryable(err),
            }
        }
    }
}
