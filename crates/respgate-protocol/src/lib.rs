//! Wire types and header conventions for the upstream Responses WebSocket
//! protocol (WSv2). This crate owns only the shapes exchanged on the wire;
//! it knows nothing about scheduling, pooling, or retry policy.

pub mod auth;
pub mod event;
pub mod headers;
pub mod request;

pub use auth::{AuthProvider, Credential};
pub use event::{ResponseEvent, TokenUsage};
pub use request::{
    Reasoning, ResponseCreateWsRequest, ResponsesApiRequest, ResponsesWsRequest, TextControls,
    TextFormat, TextFormatType,
};
