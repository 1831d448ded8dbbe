//! Core types and error definitions for the AgentMesh runtime.
//!
//! This crate provides the foundational types shared across all AgentMesh
//! crates: the error taxonomy, the task lifecycle model, progress events,
//! and the wire envelope exchanged between agents.
//!
//! # Main types
//!
//! - [`MeshError`] — Unified error enum for all AgentMesh subsystems.
//! - [`MeshResult`] — Convenience alias for `Result<T, MeshError>`.
//! - [`TaskRecord`] — One unit of orchestrated work and its lifecycle.
//! - [`TaskStatus`] — Monotonic task state machine.
//! - [`MeshEvent`] — A structured progress event emitted during dispatch.
//! - [`AgentRequest`] / [`AgentResponse`] — The agent-to-agent wire envelope.

/// Progress events emitted by the orchestrator and consumed by subscribers.
pub mod event;
/// Task lifecycle model: records, statuses, progress log, partial updates.
pub mod task;
/// JSON wire envelope for agent-to-agent calls.
pub mod wire;

pub use event::{EventKind, MeshEvent};
pub use task::{ProgressEntry, TaskPatch, TaskRecord, TaskStatus};
pub use wire::{AgentRequest, AgentResponse, RequestParams, WireError};

/// Top-level error type for the AgentMesh runtime.
///
/// Each variant corresponds to a failure class with its own propagation
/// policy; see the per-variant docs for whether a failure is retried.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// A logical agent name that no registry entry resolves. Never retried.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// A transport failure or exhausted retry budget on an outbound call.
    #[error("Communication error: {0}")]
    Communication(String),

    /// The per-host connection cap was reached and the caller's wait timed out.
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// A malformed or unexpected response payload. Never retried.
    #[error("Response format error: {0}")]
    ResponseFormat(String),

    /// A workflow planning or execution failure (cyclic graph, cascaded node failure).
    #[error("Coordination failure: {0}")]
    Coordination(String),

    /// An error from the task store (illegal transition, snapshot I/O).
    #[error("Task store error: {0}")]
    Store(String),

    /// An error from the push notification layer.
    #[error("Notifier error: {0}")]
    Notify(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MeshError`].
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = MeshError::AgentNotFound("ghost".into());
        assert_eq!(err.to_string(), "Agent not found: ghost");

        let err = MeshError::Communication("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn json_error_converts() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: MeshError = parse_err.into();
        assert!(matches!(err, MeshError::Json(_)));
    }
}
