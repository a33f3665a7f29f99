//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP vs Unix socket)
//! * Protocol session lifecycle (startup, auth, statements, close)
//! * State machine enforcement
//! * TLS configuration and in-band capability negotiation

mod conn;
mod negotiate;
mod state;
mod tls;
mod transport;

pub use conn::{AuthMethod, Connection, ConnectionOptions, ConnectionOptionsBuilder};
pub use negotiate::{negotiate_tls, NegotiationOutcome};
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsOptions};
pub use transport::{TcpVariant, Transport};
