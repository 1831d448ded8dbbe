//! Push notification layer: live subscriber management, per-subscriber
//! event filtering, bounded backlog queues for unreachable subscribers,
//! and heartbeat-based connection health monitoring.
//!
//! # Main types
//!
//! - [`PushNotifier`] — Owns every [`Subscription`] and all delivery.
//! - [`EventFilter`] — Per-subscriber predicate over event type, agent
//!   name, task id, and topic.
//! - [`NotifierConfig`] — Queue bounds, backlog TTL, heartbeat cadence.

/// Per-subscriber event filtering.
pub mod filter;
/// The notifier and its heartbeat loop.
pub mod notifier;

pub use filter::EventFilter;
pub use notifier::{NotifierConfig, NotifierStats, PushNotifier, Subscription};
