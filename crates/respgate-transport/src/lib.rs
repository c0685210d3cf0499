//! A single upstream WebSocket, pumped by a background task. This crate
//! has no notion of accounts, scheduling, or pooling — it just dials,
//! reads, writes, and reports transport-level failure.

pub mod error;
pub mod stream;

pub use error::TransportError;
pub use stream::{ResponseHeaders, WsStream};
