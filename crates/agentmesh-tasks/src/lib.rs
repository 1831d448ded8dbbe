//! Task lifecycle store: a bounded in-memory table of orchestration tasks
//! with TTL expiry, LRU eviction, a background sweep, and optional atomic
//! disk snapshots.
//!
//! # Main types
//!
//! - [`TaskStore`] — The store itself; all mutation goes through its
//!   public operations under a single mutex domain.
//! - [`TaskStoreConfig`] — Capacity, sweep cadence, snapshot settings.
//! - [`TaskFilter`] — Status/agent filters with pagination for listing.

/// Snapshot serialization helpers (atomic write, expired-dropping load).
pub mod snapshot;
/// The mutex-guarded task table and its background loops.
pub mod store;

pub use store::{TaskFilter, TaskStore, TaskStoreConfig, TaskStoreStats};
