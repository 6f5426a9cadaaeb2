//! Declarative pipeline files.
//!
//! A pipeline is a TOML document listing agents and task nodes by key:
//!
//! ```toml
//! name = "content-pipeline"
//! default_agent = "researcher"
//!
//! [[agents]]
//! key = "researcher"
//! name = "Researcher"
//! model = "gpt-4o"
//!
//! [[nodes]]
//! key = "research"
//! prompt = "Research AI trends in 2024"
//! ```
//!
//! [`Pipeline::build`] turns it into a runnable [`Graph`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, AgentProvider, AgentSpec};
use crate::core::{Graph, GraphConfig, NodeId, TaskNodeSpec};
use crate::{glog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDef {
    pub key: String,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
}

impl AgentDef {
    pub fn spec(&self) -> AgentSpec {
        AgentSpec::new(&self.name, &self.model).with_system_prompt(&self.system_prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    pub key: String,
    pub prompt: String,
    /// Agent key; the pipeline's `default_agent` when absent.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

/// A built graph plus the node ids assigned to each pipeline key.
#[derive(Debug)]
pub struct BuiltPipeline {
    pub graph: Graph,
    pub nodes: HashMap<String, NodeId>,
}

impl BuiltPipeline {
    pub fn node(&self, key: &str) -> Option<NodeId> {
        self.nodes.get(key).copied()
    }

    pub fn key_of(&self, id: &NodeId) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, v)| *v == id)
            .map(|(k, _)| k.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let pipeline: Pipeline = toml::from_str(s)?;
        pipeline.validate()?;
        Ok(pipeline)
    }
}

impl Pipeline {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let pipeline: Pipeline = content.parse()?;
        glog_debug!(
            "Loaded pipeline '{}' from {} ({} agents, {} nodes)",
            pipeline.name,
            path.display(),
            pipeline.agents.len(),
            pipeline.nodes.len()
        );
        Ok(pipeline)
    }

    /// Check keys and references. Cycles are reported by
    /// [`execution_order`](Self::execution_order).
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("pipeline name is empty".to_string()));
        }

        let mut agent_keys = HashSet::new();
        for agent in &self.agents {
            if agent.key.trim().is_empty() {
                return Err(Error::Validation("agent key is empty".to_string()));
            }
            if !agent_keys.insert(agent.key.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate agent key '{}'",
                    agent.key
                )));
            }
        }

        if let Some(default) = &self.default_agent {
            if !agent_keys.contains(default.as_str()) {
                return Err(Error::Validation(format!(
                    "default_agent '{}' is not a declared agent",
                    default
                )));
            }
        }

        let mut node_keys = HashSet::new();
        for node in &self.nodes {
            if node.key.trim().is_empty() {
                return Err(Error::Validation("node key is empty".to_string()));
            }
            if !node_keys.insert(node.key.as_str()) {
                return Err(Error::Validation(format!("duplicate node key '{}'", node.key)));
            }
            if node.prompt.trim().is_empty() {
                return Err(Error::Validation(format!("node '{}' has an empty prompt", node.key)));
            }
        }

        for node in &self.nodes {
            match node.agent.as_deref().or(self.default_agent.as_deref()) {
                Some(agent) if agent_keys.contains(agent) => {}
                Some(agent) => {
                    return Err(Error::Validation(format!(
                        "node '{}' references unknown agent '{}'",
                        node.key, agent
                    )))
                }
                None => {
                    return Err(Error::Validation(format!(
                        "node '{}' has no agent and the pipeline has no default_agent",
                        node.key
                    )))
                }
            }
            for dep in &node.depends_on {
                if !node_keys.contains(dep.as_str()) {
                    return Err(Error::Validation(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.key, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Node keys ordered so each comes after everything it depends on.
    pub fn execution_order(&self) -> Result<Vec<&str>> {
        self.validate()?;

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = self
            .nodes
            .iter()
            .map(|n| (n.key.as_str(), graph.add_node(n.key.as_str())))
            .collect();
        for node in &self.nodes {
            for dep in &node.depends_on {
                graph.add_edge(index[dep.as_str()], index[node.key.as_str()], ());
            }
        }

        match toposort(&graph, None) {
            Ok(sorted) => Ok(sorted.into_iter().map(|i| graph[i]).collect()),
            Err(cycle) => {
                let at = cycle.node_id();
                // a dependency of `at` that `at` also reaches closes the loop
                let node = &self.nodes[at.index()];
                let closing = node
                    .depends_on
                    .iter()
                    .find(|dep| has_path_connecting(&graph, at, index[dep.as_str()], None))
                    .map(String::as_str)
                    .unwrap_or(node.key.as_str());
                Err(Error::Cycle {
                    from: closing.to_string(),
                    to: node.key.clone(),
                })
            }
        }
    }

    /// Keys of nodes nothing depends on, in declaration order.
    pub fn output_keys(&self) -> Vec<&str> {
        let depended: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.depends_on.iter().map(String::as_str))
            .collect();
        self.nodes
            .iter()
            .map(|n| n.key.as_str())
            .filter(|k| !depended.contains(k))
            .collect()
    }

    /// Create every agent through `provider` and assemble the graph.
    pub async fn build(&self, provider: &dyn AgentProvider) -> Result<BuiltPipeline> {
        let order = self.execution_order()?;
        let mut graph = Graph::new(GraphConfig::new(&self.name));

        let mut agents: HashMap<&str, AgentId> = HashMap::new();
        for def in &self.agents {
            let agent = Agent::create(def.spec(), provider).await?;
            agents.insert(def.key.as_str(), graph.register_agent(&agent));
        }
        if let Some(key) = &self.default_agent {
            graph.set_default_agent(agents.get(key.as_str()).copied())?;
        }

        let defs: HashMap<&str, &NodeDef> =
            self.nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        let mut nodes: HashMap<String, NodeId> = HashMap::new();
        for key in order {
            let Some(def) = defs.get(key) else {
                continue;
            };
            let dependencies = def
                .depends_on
                .iter()
                .map(|dep| {
                    nodes
                        .get(dep)
                        .copied()
                        .ok_or_else(|| Error::Validation(format!("unknown node '{}'", dep)))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut spec = TaskNodeSpec::new(&def.prompt)
                .named(&def.key)
                .depends_on(dependencies);
            if let Some(agent) = def.agent.as_deref().and_then(|a| agents.get(a)) {
                spec = spec.agent(*agent);
            }
            let id = graph.add_task_node(spec)?;
            nodes.insert(def.key.clone(), id);
        }

        glog_debug!(
            "Built pipeline '{}': {} agents, {} nodes",
            self.name,
            graph.agent_count(),
            graph.node_count()
        );
        Ok(BuiltPipeline { graph, nodes })
    }
}
