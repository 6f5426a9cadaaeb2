//! Task graph: named DAG of task nodes plus the agents that execute them.
//!
//! Nodes live in a petgraph `DiGraph` arena; an edge `a -> b` means `b`
//! depends on `a`. A side map from [`NodeId`] to `NodeIndex` gives O(1)
//! lookups. Every mutation that adds edges is checked for cycles and rolled
//! back on failure, so the graph is a DAG at all times.

use crate::agent::{Agent, AgentId};
use crate::core::node::{NodeId, NodeStatus, TaskNode, TaskNodeSpec};
use crate::error::{Error, Result};
use crate::glog_debug;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Graph-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub name: String,
    /// Agent used by nodes that do not name one. Must be registered with the
    /// graph before nodes rely on it.
    #[serde(default)]
    pub default_agent: Option<AgentId>,
}

impl GraphConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_agent: None,
        }
    }
}

pub struct Graph {
    config: GraphConfig,
    graph: DiGraph<TaskNode, ()>,
    node_index: HashMap<NodeId, NodeIndex>,
    agents: HashMap<AgentId, Agent>,
}

impl Graph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            agents: HashMap::new(),
        }
    }

    /// Create a graph whose default agent is `agent`.
    pub fn with_default_agent(config: GraphConfig, agent: &Agent) -> Self {
        let mut graph = Self::new(config);
        let id = graph.register_agent(agent);
        graph.config.default_agent = Some(id);
        graph
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn default_agent(&self) -> Option<AgentId> {
        self.config.default_agent
    }

    /// Change the default agent. Affects only nodes added afterwards.
    pub fn set_default_agent(&mut self, id: Option<AgentId>) -> Result<()> {
        if let Some(id) = id {
            if !self.agents.contains_key(&id) {
                return Err(Error::AgentNotFound(id));
            }
        }
        self.config.default_agent = id;
        Ok(())
    }

    /// Make `agent` available to nodes of this graph. Re-registering the same
    /// agent is a no-op.
    pub fn register_agent(&mut self, agent: &Agent) -> AgentId {
        let id = agent.id();
        self.agents.entry(id).or_insert_with(|| agent.clone());
        id
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Register a task node.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if the spec names no agent and the graph has
    ///   no default agent
    /// - `Error::AgentNotFound` if the agent was never registered
    /// - `Error::NodeNotFound` if a dependency is not in the graph
    /// - `Error::Cycle` if the dependency edges would close a cycle
    ///
    /// The graph is unchanged when an error is returned.
    pub fn add_task_node(&mut self, spec: TaskNodeSpec) -> Result<NodeId> {
        let agent_id = spec.agent_id.or(self.config.default_agent).ok_or_else(|| {
            Error::Configuration(format!(
                "node '{}' has no agent and graph '{}' has no default agent",
                spec.name.as_deref().unwrap_or(&spec.prompt),
                self.config.name
            ))
        })?;
        if !self.agents.contains_key(&agent_id) {
            return Err(Error::AgentNotFound(agent_id));
        }

        let mut dependencies: Vec<NodeId> = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            if !self.contains(&dep) {
                return Err(Error::NodeNotFound(dep));
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        let mut node = TaskNode::new(&spec.prompt, agent_id);
        node.name = spec.name;
        node.dependencies = dependencies.clone();
        let id = node.id;
        let label = node.label();

        let index = self.graph.add_node(node);
        self.node_index.insert(id, index);

        let edges: Vec<(NodeId, NodeId)> = dependencies.iter().map(|dep| (*dep, id)).collect();
        if let Err(e) = self.add_edges_checked(&edges) {
            // index is the last node, so removal does not disturb other indices
            self.graph.remove_node(index);
            self.node_index.remove(&id);
            return Err(e);
        }

        glog_debug!(
            "Graph '{}': added node {} ({}) with {} dependencies",
            self.config.name,
            id.short(),
            label,
            dependencies.len()
        );
        Ok(id)
    }

    /// Declare that `to` depends on `from`.
    ///
    /// Adding an existing dependency is a no-op.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` for unknown ids, `Error::Cycle` if the edge
    /// (including a self-dependency) would close a cycle. The graph is
    /// unchanged on error.
    pub fn add_dependency(&mut self, from: &NodeId, to: &NodeId) -> Result<()> {
        let from_index = self.index_of(from)?;
        let to_index = self.index_of(to)?;
        if self.graph.find_edge(from_index, to_index).is_some() {
            return Ok(());
        }

        self.add_edges_checked(&[(*from, *to)])?;
        if let Some(node) = self.graph.node_weight_mut(to_index) {
            node.dependencies.push(*from);
        }
        Ok(())
    }

    fn index_of(&self, id: &NodeId) -> Result<NodeIndex> {
        self.node_index
            .get(id)
            .copied()
            .ok_or(Error::NodeNotFound(*id))
    }

    /// Add all edges, or none of them if the result would be cyclic.
    fn add_edges_checked(&mut self, edges: &[(NodeId, NodeId)]) -> Result<()> {
        let mut pairs: Vec<(NodeIndex, NodeIndex)> = Vec::with_capacity(edges.len());
        for (from, to) in edges {
            pairs.push((self.index_of(from)?, self.index_of(to)?));
        }
        let added: Vec<EdgeIndex> = pairs
            .into_iter()
            .map(|(a, b)| self.graph.add_edge(a, b, ()))
            .collect();

        if !is_cyclic_directed(&self.graph) {
            return Ok(());
        }

        // Remove newest first: remove_edge swaps the last edge into the hole.
        for edge in added.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
        let (from, to) = edges
            .iter()
            .find(|(from, to)| from == to)
            .or_else(|| edges.last())
            .copied()
            .unwrap_or_default();
        Err(Error::Cycle {
            from: self.label(&from),
            to: self.label(&to),
        })
    }

    pub fn node(&self, id: &NodeId) -> Option<&TaskNode> {
        self.node_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut TaskNode> {
        let index = *self.node_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    pub fn status(&self, id: &NodeId) -> Option<&NodeStatus> {
        self.node(id).map(|n| &n.status)
    }

    /// Node name or short id; `"unknown"` for ids outside the graph.
    pub fn label(&self, id: &NodeId) -> String {
        self.node(id)
            .map(TaskNode::label)
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn has_dependency(&self, from: &NodeId, to: &NodeId) -> bool {
        match (self.node_index.get(from), self.node_index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Direct dependencies of `id`, in declaration order.
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `id`, in insertion order.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&index) = self.node_index.get(id) else {
            return Vec::new();
        };
        let mut indices: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        indices.sort();
        indices.dedup();
        indices
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i).map(|n| n.id))
            .collect()
    }

    /// Nodes nothing depends on; the pipeline's final outputs.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .filter_map(|i| self.graph.node_weight(i).map(|n| n.id))
            .collect()
    }

    /// Node ids ordered so every node comes after all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let label = self
                .graph
                .node_weight(cycle.node_id())
                .map(TaskNode::label)
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("Cycle detected at node: {}", label))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).map(|n| n.id))
            .collect())
    }

    /// Put every node back to `Pending` before a new run.
    pub fn reset(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.reset();
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.config.name)
            .field("nodes", &self.node_count())
            .field("dependencies", &self.dependency_count())
            .field("agents", &self.agent_count())
            .finish()
    }
}
