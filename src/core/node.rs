//! Task node data model.
//!
//! A node is one prompt bound to one agent, plus the ids of the nodes whose
//! output it needs. Nodes track their lifecycle status and timing for the
//! current run.

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Node status within one run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeStatus {
    /// Waiting for dependencies or a free slot.
    #[default]
    Pending,
    /// Agent invocation in flight.
    Running,
    Completed,
    Failed {
        error: String,
    },
    /// Never invoked because an upstream node failed or the run was cancelled.
    Skipped {
        reason: String,
    },
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Completed => write!(f, "completed"),
            NodeStatus::Failed { error } => write!(f, "failed: {}", error),
            NodeStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Parameters for [`Graph::add_task_node`](crate::core::Graph::add_task_node).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskNodeSpec {
    pub prompt: String,
    /// Falls back to the graph's default agent when `None`.
    pub agent_id: Option<AgentId>,
    pub dependencies: Vec<NodeId>,
    pub name: Option<String>,
}

impl TaskNodeSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = NodeId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub name: Option<String>,
    pub prompt: String,
    pub agent_id: AgentId,
    /// Dependencies in declaration order.
    pub dependencies: Vec<NodeId>,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    pub fn new(prompt: &str, agent_id: AgentId) -> Self {
        Self {
            id: NodeId::new(),
            name: None,
            prompt: prompt.to_string(),
            agent_id,
            dependencies: Vec::new(),
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// The node name, or its short id when unnamed.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.short())
    }

    pub fn start(&mut self) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = NodeStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = NodeStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self, reason: &str) {
        self.status = NodeStatus::Skipped {
            reason: reason.to_string(),
        };
    }

    /// Back to `Pending` with timing cleared, ready for another run.
    pub fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Completed | NodeStatus::Failed { .. } | NodeStatus::Skipped { .. }
        )
    }

    pub fn is_pending(&self) -> bool {
        self.status == NodeStatus::Pending
    }

    /// Wall time of the last invocation, if it finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}
