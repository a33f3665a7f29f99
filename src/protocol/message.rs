//! Protocol message types

use super::constants::decline;

/// Client message (client → server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Set boolean connection capabilities
    CapabilitiesSet {
        /// Capability name/value pairs
        capabilities: Vec<(String, bool)>,
    },

    /// Start authentication
    AuthenticateStart {
        /// Mechanism name (e.g. "PLAIN", "SHA256_MEMORY")
        mechanism: String,
        /// Mechanism specific data
        auth_data: Vec<u8>,
    },

    /// Authentication challenge response
    AuthenticateContinue {
        /// Mechanism specific data
        auth_data: Vec<u8>,
    },

    /// Execute an SQL statement
    StmtExecute {
        /// Statement text
        stmt: String,
    },

    /// Close the session (keeps the connection open)
    SessionClose,

    /// Close the connection
    ConnectionClose,
}

/// Server message (server → client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Generic success reply
    Ok(String),

    /// Error reply
    Error(ServerError),

    /// Authentication challenge
    AuthenticateContinue {
        /// Mechanism specific data
        auth_data: Vec<u8>,
    },

    /// Authentication succeeded
    AuthenticateOk,

    /// Notice frame (session state changes, warnings)
    Notice,

    /// Statement executed
    StmtExecuteOk,

    /// Any other message (result set metadata, rows, ...)
    Other {
        /// Message type tag
        msg_type: u8,
    },
}

/// Error severity as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error, the session stays usable
    #[default]
    Error,
    /// Fatal, the server closes the session
    Fatal,
}

impl Severity {
    /// Numeric severity code
    pub fn code(self) -> u16 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Fatal => 3,
        }
    }

    /// Map the wire value of `Mysqlx.Error.severity` (ERROR = 0, FATAL = 1)
    pub(crate) fn from_wire(value: u64) -> Self {
        if value == 1 {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }
}

/// Error reply fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerError {
    /// Severity
    pub severity: Severity,
    /// Server error code
    pub code: u32,
    /// SQL state
    pub sql_state: String,
    /// Human-readable message
    pub message: String,
}

impl ServerError {
    /// Whether this is the "capability not available" reply that permits a
    /// downgrade to a plain connection.
    pub fn is_capability_decline(&self) -> bool {
        self.code == decline::CODE
            && self.severity.code() == 2
            && self.sql_state == decline::SQL_STATE
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        write!(f, " (error {}, {})", self.code, self.sql_state)
    }
}
