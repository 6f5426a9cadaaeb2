//! Core domain model: task nodes and the dependency graph that holds them.

pub mod graph;
pub mod node;

pub use graph::{Graph, GraphConfig};
pub use node::{NodeId, NodeStatus, TaskNode, TaskNodeSpec};
