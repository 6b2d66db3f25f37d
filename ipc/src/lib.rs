// This crate centralizes the messages exchanged between a controller and its worker.

pub mod codec; // Content-Length framing over byte streams
pub mod errors; // Call-level error taxonomy
pub mod messages; // CallRequest / CallResult / ChannelMessage

pub use errors::{CallError, InvalidCallSpec, MalformedMessage};
pub use messages::{CallConfig, CallRequest, CallResult, CallSpec, ChannelMessage};
