//! Error types and failover classification

use crate::protocol::ServerError;
use std::io;
use thiserror::Error;

/// Result type for mysqlx-wire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Authentication was rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed or unexpected wire data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration (including TLS option combinations)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Endpoint kind this client cannot talk to
    #[error("{0}")]
    Unsupported(String),

    /// Error reply sent by the server
    #[error("{0}")]
    Server(ServerError),

    /// Invalid connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Every candidate endpoint failed
    #[error("{}", unreachable_message(*attempts))]
    Unreachable {
        /// Number of endpoints that were tried
        attempts: usize,
    },
}

fn unreachable_message(attempts: usize) -> &'static str {
    if attempts == 1 {
        "could not connect to the given data source"
    } else {
        "could not connect to any of the given data sources"
    }
}

/// Error code used by the failover policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Anything without a more specific code
    Generic,
    /// Endpoint unreachable or connection lost
    Network,
    /// Credentials rejected
    AuthFailure,
    /// Wire encoding/decoding failure
    Encoding,
    /// Transport security failure
    Tls,
    /// Server error reply carrying its own code
    Server(u32),
}

/// Failover decision for an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Abort the whole connection attempt
    Fatal,
    /// Try the next candidate endpoint
    Recoverable,
}

/// Classify an error code.
///
/// The fatal set is fixed: authentication, wire encoding and transport
/// security failures. Every other code is recoverable.
pub fn classify(code: ErrorCode) -> Classification {
    match code {
        ErrorCode::AuthFailure | ErrorCode::Encoding | ErrorCode::Tls => Classification::Fatal,
        ErrorCode::Generic | ErrorCode::Network | ErrorCode::Server(_) => {
            Classification::Recoverable
        }
    }
}

impl Error {
    /// Code of this error as seen by the failover policy
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(_) | Error::ConnectionClosed => ErrorCode::Network,
            Error::Authentication(_) => ErrorCode::AuthFailure,
            Error::Protocol(_) => ErrorCode::Encoding,
            Error::Tls(_) => ErrorCode::Tls,
            Error::Server(err) => ErrorCode::Server(err.code),
            Error::Config(_)
            | Error::Unsupported(_)
            | Error::InvalidState { .. }
            | Error::Unreachable { .. } => ErrorCode::Generic,
        }
    }

    /// Shorthand for `classify(self.code())`.
    ///
    /// This is the verdict failover applies to a failed transport connect.
    /// Errors raised later (TLS negotiation, session startup, unsupported
    /// endpoints) stop failover whatever their classification.
    pub fn classification(&self) -> Classification {
        classify(self.code())
    }

    /// Whether another endpoint could not be expected to do better.
    ///
    /// Only network failures (`Io`, `ConnectionClosed`) are non-fatal.
    /// Configuration, unsupported endpoint and server errors are fatal here
    /// even though [`classify`] calls their codes recoverable.
    pub fn is_fatal(&self) -> bool {
        self.code() != ErrorCode::Network
    }

    /// Stable label for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::ConnectionClosed => "connection_closed",
            Error::Authentication(_) => "authentication",
            Error::Protocol(_) => "protocol",
            Error::Tls(_) => "tls",
            Error::Config(_) => "config",
            Error::Unsupported(_) => "unsupported",
            Error::Server(_) => "server",
            Error::InvalidState { .. } => "invalid_state",
            Error::Unreachable { .. } => "unreachable",
        }
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}
