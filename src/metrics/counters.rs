//! Counter metrics

use super::labels;
use crate::error::Classification;

/// A connect attempt was started
pub fn connect_attempted(transport: &'static str) {
    metrics::counter!("mysqlx_connect_attempts_total", labels::TRANSPORT => transport)
        .increment(1);
}

/// A connect attempt failed
pub fn connect_failed(transport: &'static str, classification: Classification) {
    let class = match classification {
        Classification::Fatal => labels::CLASS_FATAL,
        Classification::Recoverable => labels::CLASS_RECOVERABLE,
    };
    metrics::counter!(
        "mysqlx_connect_failures_total",
        labels::TRANSPORT => transport,
        labels::CLASSIFICATION => class
    )
    .increment(1);
}

/// A TLS capability negotiation finished
pub fn tls_negotiated(outcome: &'static str) {
    metrics::counter!("mysqlx_tls_negotiations_total", labels::OUTCOME => outcome).increment(1);
}

/// A session was established
pub fn session_established(transport: &'static str) {
    metrics::counter!("mysqlx_sessions_established_total", labels::TRANSPORT => transport)
        .increment(1);
}

/// Session construction failed
pub fn session_failed(category: &'static str) {
    metrics::counter!("mysqlx_session_failures_total", labels::ERROR_CATEGORY => category)
        .increment(1);
}

/// Every endpoint of a failover list failed
pub fn failover_exhausted() {
    metrics::counter!("mysqlx_failover_exhausted_total").increment(1);
}

/// An open transaction was rolled back during teardown
pub fn teardown_rollback() {
    metrics::counter!("mysqlx_teardown_rollbacks_total").increment(1);
}
