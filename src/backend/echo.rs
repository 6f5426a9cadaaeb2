use std::sync::Arc;

use futures::future::BoxFuture;

use crate::agent::{AgentBackend, AgentProvider, AgentSpec, InvocationRequest};
use crate::Result;

/// Answers with `[<agent>/<model>] <prompt>`, noting how many dependency
/// outputs it was given. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn respond(request: &InvocationRequest) -> String {
        let mut out = format!("[{}/{}] {}", request.agent, request.model, request.prompt);
        if !request.context.is_empty() {
            out.push_str(&format!(" (with {} context entries)", request.context.len()));
        }
        out
    }
}

impl AgentBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn invoke<'a>(&'a self, request: &'a InvocationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(Self::respond(request)) })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProvider;

impl AgentProvider for EchoProvider {
    fn connect<'a>(&'a self, _spec: &'a AgentSpec) -> BoxFuture<'a, Result<Arc<dyn AgentBackend>>> {
        Box::pin(async { Ok(Arc::new(EchoBackend) as Arc<dyn AgentBackend>) })
    }
}
