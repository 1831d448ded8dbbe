//! The orchestration engine: typed agent dispatch, task lifecycle
//! bookkeeping, wave-by-wave workflow execution, and quality gating.
//!
//! # Main types
//!
//! - [`Engine`] — Executes single agent calls and whole workflows,
//!   recording every call as a task and emitting progress events.
//! - [`HandlerRegistry`] — Maps agent names to typed [`AgentHandler`]s,
//!   resolved once at startup; unknown names fail fast.
//! - [`RemoteAgent`] — Handler bridging to a networked agent through the
//!   protocol client.
//! - [`EventBus`] — Broadcast channel of [`MeshEvent`]s; the push notifier
//!   and the log are independent consumers.
//!
//! [`MeshEvent`]: agentmesh_core::MeshEvent

/// The dispatch engine.
pub mod engine;
/// Progress event bus and its consumers.
pub mod events;
/// Typed agent handlers and their registry.
pub mod handler;

pub use engine::{Engine, EngineConfig, ExecuteOutcome, ExecuteRequest, NodeResult, WorkflowOutcome};
pub use events::EventBus;
pub use handler::{AgentHandler, EchoAgent, HandlerRegistry, RemoteAgent};
