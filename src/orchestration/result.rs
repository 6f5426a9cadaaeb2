//! Outcome of one graph run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::NodeId;
use crate::error::Error;

/// Payload stored for each completed node, serialized as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub response: String,
    pub agent: String,
    pub model: String,
    pub node_id: NodeId,
}

impl NodeOutput {
    /// Strict parse of a full payload; `None` when `raw` is not one.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Just the `response` field of a JSON object, tolerating missing extras.
    pub fn response_of(raw: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value.get("response")?.as_str().map(String::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NodeErrorKind {
    /// The backend failed or returned something unusable.
    AgentInvocation,
    Timeout,
    /// Not run because `upstream` failed.
    SkippedDependency { upstream: NodeId },
    /// The run was cancelled before or while this node ran.
    Cancelled,
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeErrorKind::AgentInvocation => write!(f, "agent invocation"),
            NodeErrorKind::Timeout => write!(f, "timeout"),
            NodeErrorKind::SkippedDependency { upstream } => {
                write!(f, "skipped dependency ({})", upstream.short())
            }
            NodeErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a node has no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub node_id: NodeId,
    pub kind: NodeErrorKind,
    pub message: String,
}

impl NodeError {
    /// Classify an invocation error.
    pub fn from_error(node_id: NodeId, error: &Error) -> Self {
        let kind = match error {
            Error::Timeout(_) => NodeErrorKind::Timeout,
            Error::Cancelled => NodeErrorKind::Cancelled,
            _ => NodeErrorKind::AgentInvocation,
        };
        Self {
            node_id,
            kind,
            message: error.to_string(),
        }
    }

    pub fn skipped(node_id: NodeId, upstream: NodeId, upstream_label: &str) -> Self {
        Self {
            node_id,
            kind: NodeErrorKind::SkippedDependency { upstream },
            message: format!("upstream node '{}' failed", upstream_label),
        }
    }

    pub fn cancelled(node_id: NodeId) -> Self {
        Self {
            node_id,
            kind: NodeErrorKind::Cancelled,
            message: Error::Cancelled.to_string(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self.kind, NodeErrorKind::SkippedDependency { .. })
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.node_id.short(), self.kind, self.message)
    }
}

/// Aggregated outcome of one run.
///
/// `results` holds a raw payload for every node that completed and nothing
/// for the others; check `success` (or use [`response`](Self::response))
/// before relying on an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub graph: String,
    pub success: bool,
    pub results: HashMap<NodeId, String>,
    pub errors: Vec<NodeError>,
    pub elapsed_ms: u64,
}

impl RunResult {
    /// Raw payload of a completed node.
    pub fn output(&self, id: &NodeId) -> Option<&str> {
        self.results.get(id).map(String::as_str)
    }

    /// The `response` text of a completed node; `None` if the node did not
    /// complete or its payload has no `response` string.
    pub fn response(&self, id: &NodeId) -> Option<String> {
        self.output(id).and_then(NodeOutput::response_of)
    }

    pub fn parsed(&self, id: &NodeId) -> Option<NodeOutput> {
        self.output(id).and_then(NodeOutput::parse)
    }

    pub fn error_for(&self, id: &NodeId) -> Option<&NodeError> {
        self.errors.iter().find(|e| e.node_id == *id)
    }

    pub fn completed_count(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeError> {
        self.errors.iter().filter(|e| !e.is_skip())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &NodeError> {
        self.errors.iter().filter(|e| e.is_skip())
    }
}
