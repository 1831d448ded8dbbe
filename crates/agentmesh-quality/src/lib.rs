//! Quality gating for orchestrated results.
//!
//! A [`QualityGate`] validates a structured result against a set of named,
//! weighted [`QualityThreshold`]s and produces a [`QualityVerdict`]: a
//! pass/fail flag, a weighted score, and the list of violated checks. A
//! failed verdict is a structured negative result, never an error.
//!
//! Threshold sets come in [`QualityDomain`] bundles (business, academic,
//! service, generic) that callers can override per invocation.

/// The gate and its verdicts.
pub mod gate;
/// Thresholds and domain default sets.
pub mod threshold;

pub use gate::{QualityGate, QualityVerdict};
pub use threshold::{QualityDomain, QualityThreshold};
