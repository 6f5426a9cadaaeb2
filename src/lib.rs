pub mod agent;
pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod pipeline;

pub use agent::{Agent, AgentBackend, AgentId, AgentProvider, AgentSpec};
pub use crate::core::{Graph, GraphConfig, NodeId, NodeStatus, TaskNodeSpec};
pub use error::{Error, Result};
pub use orchestration::{NodeError, NodeErrorKind, NodeOutput, RunEvent, RunOptions, RunResult, Runner};
pub use pipeline::{BuiltPipeline, Pipeline};
