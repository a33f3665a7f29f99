//! Label keys and values

/// Transport kind label key
pub const TRANSPORT: &str = "transport";

/// Failure classification label key
pub const CLASSIFICATION: &str = "classification";

/// Error category label key
pub const ERROR_CATEGORY: &str = "error_category";

/// Negotiation outcome label key
pub const OUTCOME: &str = "outcome";

/// TCP endpoint
pub const TRANSPORT_TCP: &str = "tcp";

/// Local socket endpoint
pub const TRANSPORT_UNIX: &str = "unix";

/// Classic protocol endpoint
pub const TRANSPORT_LEGACY: &str = "legacy";

/// Fatal failure
pub const CLASS_FATAL: &str = "fatal";

/// Recoverable failure
pub const CLASS_RECOVERABLE: &str = "recoverable";

/// TLS negotiation skipped (ssl-mode disabled)
pub const OUTCOME_SKIPPED: &str = "skipped";

/// TLS upgrade accepted
pub const OUTCOME_ACCEPTED: &str = "accepted";

/// TLS upgrade declined by the server
pub const OUTCOME_DECLINED: &str = "declined";

/// Negotiation aborted
pub const OUTCOME_ABORTED: &str = "aborted";
