use thiserror::Error;

use crate::agent::AgentId;
use crate::core::NodeId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Adding dependency from {from} to {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Agent invocation failed: {0}")]
    AgentInvocation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
