//! JSON-RPC 2.0 message types and error codes for the earnwatch control
//! surface and event stream.

pub mod errors;
pub mod messages;
