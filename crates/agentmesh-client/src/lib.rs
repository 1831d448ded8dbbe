//! Outbound protocol layer: agent name resolution, pooled connections,
//! and the retrying RPC client.
//!
//! # Main types
//!
//! - [`PortRegistry`] — Logical agent name → network endpoint mapping.
//! - [`ConnectionPool`] — Per-host capped, keep-alive connection pool.
//! - [`ProtocolClient`] — Sends wire-envelope requests with timeout/retry
//!   policy, health checks, and session statistics.

/// Retrying RPC client with health checks and session statistics.
pub mod client;
/// Per-host capped connection pool.
pub mod pool;
/// Agent name → endpoint registry.
pub mod registry;

pub use client::{
    HealthReport, HealthStatus, ProtocolClient, ResponseProcessor, RetryPolicy, SessionStats,
};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use registry::{Endpoint, PortRegistry};
