//! X Protocol constants

/// Default X Protocol port
pub const DEFAULT_PORT: u16 = 33060;

/// Size of the frame header (length + type)
pub const HEADER_LEN: usize = 5;

/// Capability name used to request transport security
pub const TLS_CAPABILITY: &str = "tls";

/// Client message type tags
pub mod client {
    /// Mysqlx.Connection.CapabilitiesSet
    pub const CON_CAPABILITIES_SET: u8 = 2;

    /// Mysqlx.Connection.Close
    pub const CON_CLOSE: u8 = 3;

    /// Mysqlx.Session.AuthenticateStart
    pub const SESS_AUTHENTICATE_START: u8 = 4;

    /// Mysqlx.Session.AuthenticateContinue
    pub const SESS_AUTHENTICATE_CONTINUE: u8 = 5;

    /// Mysqlx.Session.Close
    pub const SESS_CLOSE: u8 = 7;

    /// Mysqlx.Sql.StmtExecute
    pub const SQL_STMT_EXECUTE: u8 = 12;
}

/// Server message type tags
pub mod server {
    /// Mysqlx.Ok
    pub const OK: u8 = 0;

    /// Mysqlx.Error
    pub const ERROR: u8 = 1;

    /// Mysqlx.Session.AuthenticateContinue
    pub const SESS_AUTHENTICATE_CONTINUE: u8 = 3;

    /// Mysqlx.Session.AuthenticateOk
    pub const SESS_AUTHENTICATE_OK: u8 = 4;

    /// Mysqlx.Notice.Frame
    pub const NOTICE: u8 = 11;

    /// Mysqlx.Sql.StmtExecuteOk
    pub const SQL_STMT_EXECUTE_OK: u8 = 17;
}

/// Protobuf wire types
pub mod wire {
    /// Varint
    pub const VARINT: u8 = 0;

    /// 64-bit fixed
    pub const FIXED64: u8 = 1;

    /// Length-delimited
    pub const LEN: u8 = 2;

    /// 32-bit fixed
    pub const FIXED32: u8 = 5;
}

/// Mysqlx.Datatypes enum values
pub mod datatypes {
    /// Any.Type.SCALAR
    pub const ANY_SCALAR: u64 = 1;

    /// Scalar.Type.V_BOOL
    pub const SCALAR_V_BOOL: u64 = 7;
}

/// Error reply the server sends when it cannot enable a requested capability.
///
/// Under `ssl_mode = preferred` this reply downgrades to a plain session.
pub mod decline {
    /// Error code
    pub const CODE: u32 = 5001;

    /// SQL state
    pub const SQL_STATE: &str = "HY000";
}
