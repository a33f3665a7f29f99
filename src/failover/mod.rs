//! Connection failover
//!
//! * `source`: endpoint descriptors and the ordered endpoint list
//! * `attempt`: a single classified transport connect
//! * `builder`: the per-endpoint state machine producing one live session

mod attempt;
mod builder;
mod source;

pub use attempt::{connect_attempt, ConnectOutcome};
pub use builder::{Established, SessionBuilder};
pub use source::{Endpoint, MultiSource, MAX_PRIORITY};
