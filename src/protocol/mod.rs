//! X Protocol wire layer
//!
//! Frames are a 4-byte little-endian length, a 1-byte message type and a
//! protobuf payload. Only the messages needed to establish, negotiate,
//! authenticate and tear down a session are implemented.

pub mod constants;
pub mod decode;
pub mod encode;
mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{ClientMessage, ServerError, ServerMessage, Severity};
