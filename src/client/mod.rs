//! Client API
//!
//! * `Session`: a live session opened from one endpoint or a failover list
//! * `DataSource`: `mysqlx://` connection string parsing

mod connection_string;
mod session;

pub use connection_string::DataSource;
pub use session::Session;
