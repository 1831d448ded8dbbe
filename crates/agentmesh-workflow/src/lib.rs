//! Dependency-aware parallel workflow scheduling.
//!
//! A [`WorkflowGraph`] holds the nodes of one analysis request. [`plan`]
//! turns it into an ordered list of waves: each wave's members execute
//! concurrently, and a wave only starts once every node of the prior wave
//! is terminal. Cycles are fatal planning errors; a node failure at
//! execution time propagates only to its transitive dependents.
//!
//! [`plan`]: WorkflowGraph::plan

/// The graph, its node state machine, and the wave planner.
pub mod graph;

pub use graph::{ExecutionPlan, NodeStatus, WorkflowGraph, WorkflowNode};
