//! Agents: a named model persona backed by a pluggable invocation backend.
//!
//! An [`Agent`] pairs an immutable [`AgentSpec`] (name, model selector,
//! system prompt) with an [`AgentBackend`] that actually produces text.
//! Agents are created asynchronously through an [`AgentProvider`], which is
//! where a backend may probe for binaries or credentials.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::NodeId;
use crate::orchestration::NodeOutput;
use crate::{glog_debug, Error, Result};

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What an agent is: name, model selector and system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            system_prompt: String::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("agent name is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "agent '{}' has no model",
                self.name
            )));
        }
        Ok(())
    }
}

/// Output of a dependency handed to a downstream node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub node_id: NodeId,
    /// Display name of the dependency node.
    pub name: String,
    pub response: String,
}

/// Everything a backend needs to answer one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub agent: String,
    pub model: String,
    pub system_prompt: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Vec<ContextEntry>,
}

impl InvocationRequest {
    /// The instruction with dependency outputs prepended.
    pub fn render(&self) -> String {
        if self.context.is_empty() {
            return self.prompt.clone();
        }

        let mut out = String::from("## Context from previous steps\n\n");
        for entry in &self.context {
            out.push_str(&format!("### {}\n{}\n\n", entry.name, entry.response));
        }
        out.push_str("---\n\n");
        out.push_str(&self.prompt);
        out
    }

    /// [`render`](Self::render) preceded by the system prompt, for backends
    /// that have no separate system channel.
    pub fn full_prompt(&self) -> String {
        let body = self.render();
        if self.system_prompt.trim().is_empty() {
            body
        } else {
            format!("{}\n\n{}", self.system_prompt, body)
        }
    }
}

/// Capability that turns a request into response text.
pub trait AgentBackend: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn invoke<'a>(&'a self, request: &'a InvocationRequest) -> BoxFuture<'a, Result<String>>;
}

/// Creates backends for agent specs.
pub trait AgentProvider: Send + Sync {
    fn connect<'a>(&'a self, spec: &'a AgentSpec) -> BoxFuture<'a, Result<Arc<dyn AgentBackend>>>;
}

#[derive(Clone)]
pub struct Agent {
    id: AgentId,
    spec: AgentSpec,
    backend: Arc<dyn AgentBackend>,
}

impl Agent {
    /// Create an agent through `provider`.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for an invalid spec; any provider failure is
    /// reported as `Error::Provider`.
    pub async fn create(spec: AgentSpec, provider: &dyn AgentProvider) -> Result<Self> {
        spec.validate()?;
        let backend = provider.connect(&spec).await.map_err(|e| match e {
            Error::Provider(msg) => Error::Provider(msg),
            other => Error::Provider(format!("{}: {}", spec.name, other)),
        })?;
        let agent = Self::with_backend(spec, backend);
        glog_debug!(
            "Agent created: {} name={} model={} backend={}",
            agent.id.short(),
            agent.spec.name,
            agent.spec.model,
            agent.backend.name()
        );
        Ok(agent)
    }

    /// Wrap an existing backend without going through a provider.
    pub fn with_backend(spec: AgentSpec, backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            id: AgentId::new(),
            spec,
            backend,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn model(&self) -> &str {
        &self.spec.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.spec.system_prompt
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn request(&self, prompt: &str, context: Vec<ContextEntry>) -> InvocationRequest {
        InvocationRequest {
            agent: self.spec.name.clone(),
            model: self.spec.model.clone(),
            system_prompt: self.spec.system_prompt.clone(),
            prompt: prompt.to_string(),
            context,
        }
    }

    /// Run `request` on the backend and serialize the node output payload.
    ///
    /// # Errors
    ///
    /// Backend errors pass through; a blank response is
    /// `Error::AgentInvocation`.
    pub async fn invoke(&self, node_id: NodeId, request: &InvocationRequest) -> Result<String> {
        let response = self.backend.invoke(request).await?;
        if response.trim().is_empty() {
            return Err(Error::AgentInvocation(format!(
                "{} returned an empty response",
                self.spec.name
            )));
        }
        let output = NodeOutput {
            response,
            agent: self.spec.name.clone(),
            model: self.spec.model.clone(),
            node_id,
        };
        Ok(serde_json::to_string(&output)?)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.spec.name)
            .field("model", &self.spec.model)
            .field("backend", &self.backend.name())
            .finish()
    }
}
