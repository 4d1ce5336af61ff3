//! Client for the control API a sandbox process exposes on its Unix socket.
//!
//! Framing (HTTP/1.1 with explicit `Content-Length`) is kept apart from payload decoding so a
//! malformed response is a [`ProtocolError`] and a socket failure is a transport error.

mod api;
mod channel;
mod frame;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use api::*;
pub use channel::*;
pub use frame::*;
