//! Account scheduling, sticky continuity, concurrency limiting, the
//! WebSocket connection pool, and the turn forwarder for upstream
//! Responses-API traffic. This crate is transport-agnostic about the
//! client-facing side (HTTP/SSE framing lives in the host binary); it only
//! decides which account serves a request and drives the upstream turn.

pub mod account;
pub mod atomic_f64;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod limiter;
pub mod pool;
pub mod scheduler;
pub mod shard;
pub mod stats;
pub mod sticky;

pub use account::{Account, AccountKind, AccountLoadInfo, Platform};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use forwarder::{Forwarder, TurnOutcome, TurnRequest, TurnSink};
pub use pool::{Pool, PoolKey};
pub use scheduler::{ScheduleDecision, ScheduleRequest, Scheduler, SelectOutcome, WaitPlan};
pub use sticky::StickyStore;
