//! Histogram metrics

use super::labels;

/// Duration of a single transport connect in milliseconds
pub fn connect_duration(transport: &'static str, duration_ms: u64) {
    metrics::histogram!("mysqlx_connect_duration_ms", labels::TRANSPORT => transport)
        .record(duration_ms as f64);
}

/// Number of endpoints tried before a session was established
pub fn attempts_per_session(attempts: usize) {
    metrics::histogram!("mysqlx_attempts_per_session").record(attempts as f64);
}
