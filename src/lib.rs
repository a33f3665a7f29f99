//! mysqlx-wire: failover session establishment for the MySQL X Protocol
//!
//! A [`Session`] is opened either against one endpoint or against an ordered
//! list of alternatives. Endpoints are tried in order, each at most once;
//! network failures move on to the next candidate while authentication,
//! encoding and TLS failures abort immediately. On TCP endpoints the client
//! negotiates the `tls` capability in-band and upgrades the stream, falling
//! back to plaintext only under `ssl-mode=preferred`.
//!
//! ```no_run
//! use mysqlx_wire::Session;
//!
//! # async fn run() -> mysqlx_wire::Result<()> {
//! let mut session = Session::connect_str(
//!     "mysqlx://app:secret@[(address=db1:33060,priority=100),(address=db2:33060,priority=50)]/shop",
//! )
//! .await?;
//!
//! session.begin().await?;
//! session.commit().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod failover;
pub mod metrics;
pub mod protocol;

pub use client::Session;
pub use error::{classify, Classification, Error, ErrorCode, Result};
