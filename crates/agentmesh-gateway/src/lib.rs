//! HTTP/WebSocket surface for the orchestration runtime.
//!
//! Exposes task execution and inspection over REST and live progress
//! events over `/ws/notifications`, backed by the engine, task store, and
//! push notifier.

/// REST route handlers.
pub mod routes;
/// Router construction and shared state.
pub mod server;
/// WebSocket notification endpoint.
pub mod ws;

pub use server::{AppState, GatewayServer};
