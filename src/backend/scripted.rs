//! Programmable backend for tests and demos.
//!
//! Replies, failures and delays are matched against the agent name or a
//! substring of the node prompt; the first matching rule wins. Every call is
//! recorded with start and finish instants so tests can check ordering and
//! peak concurrency. Clones share the recording.
//!
//! It is public so the integration tests under `tests/` and library users
//! writing their own tests can drive a graph without a model CLI. The
//! binary never selects it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::agent::{AgentBackend, AgentProvider, AgentSpec, InvocationRequest};
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum Matcher {
    Agent(String),
    PromptContains(String),
}

impl Matcher {
    fn matches(&self, request: &InvocationRequest) -> bool {
        match self {
            Matcher::Agent(name) => request.agent == *name,
            Matcher::PromptContains(needle) => request.prompt.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub request: InvocationRequest,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<ScriptedCall>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the active count even when the invocation future is dropped.
struct ActiveGuard<'a> {
    recorder: &'a Recorder,
    slot: usize,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        let mut calls = self.recorder.calls.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(call) = calls.get_mut(self.slot) {
            call.finished_at = Some(Instant::now());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    replies: Vec<(Matcher, Reply)>,
    delays: Vec<(Matcher, Duration)>,
    recorder: Arc<Recorder>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_for(mut self, agent: &str, text: &str) -> Self {
        self.replies
            .push((Matcher::Agent(agent.to_string()), Reply::Text(text.to_string())));
        self
    }

    pub fn reply_when(mut self, prompt_contains: &str, text: &str) -> Self {
        self.replies.push((
            Matcher::PromptContains(prompt_contains.to_string()),
            Reply::Text(text.to_string()),
        ));
        self
    }

    pub fn fail_for(mut self, agent: &str, message: &str) -> Self {
        self.replies
            .push((Matcher::Agent(agent.to_string()), Reply::Fail(message.to_string())));
        self
    }

    pub fn fail_when(mut self, prompt_contains: &str, message: &str) -> Self {
        self.replies.push((
            Matcher::PromptContains(prompt_contains.to_string()),
            Reply::Fail(message.to_string()),
        ));
        self
    }

    pub fn delay_for(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.push((Matcher::Agent(agent.to_string()), delay));
        self
    }

    pub fn delay_when(mut self, prompt_contains: &str, delay: Duration) -> Self {
        self.delays
            .push((Matcher::PromptContains(prompt_contains.to_string()), delay));
        self
    }

    /// All recorded calls, in start order.
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.recorder
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.recorder
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Prompts of recorded calls, in start order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.request.prompt).collect()
    }

    /// Highest number of invocations that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.recorder.peak.load(Ordering::SeqCst)
    }

    fn reply(&self, request: &InvocationRequest) -> Reply {
        self.replies
            .iter()
            .find(|(m, _)| m.matches(request))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| {
                Reply::Text(format!("{} response to: {}", request.agent, request.prompt))
            })
    }

    fn delay(&self, request: &InvocationRequest) -> Option<Duration> {
        self.delays
            .iter()
            .find(|(m, _)| m.matches(request))
            .map(|(_, d)| *d)
    }

    async fn run(&self, request: &InvocationRequest) -> Result<String> {
        let slot = {
            let mut calls = self.recorder.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(ScriptedCall {
                request: request.clone(),
                started_at: Instant::now(),
                finished_at: None,
            });
            calls.len() - 1
        };
        let now_active = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard {
            recorder: &self.recorder,
            slot,
        };

        if let Some(delay) = self.delay(request) {
            tokio::time::sleep(delay).await;
        }

        match self.reply(request) {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(Error::AgentInvocation(message)),
        }
    }
}

impl AgentBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke<'a>(&'a self, request: &'a InvocationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.run(request))
    }
}

/// Hands every agent a clone of one [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    backend: ScriptedBackend,
    unreachable: Option<String>,
}

impl ScriptedProvider {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend,
            unreachable: None,
        }
    }

    /// Make every `connect` fail with `Error::Provider(message)`.
    pub fn unreachable(mut self, message: &str) -> Self {
        self.unreachable = Some(message.to_string());
        self
    }

    pub fn backend(&self) -> &ScriptedBackend {
        &self.backend
    }
}

impl AgentProvider for ScriptedProvider {
    fn connect<'a>(&'a self, _spec: &'a AgentSpec) -> BoxFuture<'a, Result<Arc<dyn AgentBackend>>> {
        Box::pin(async move {
            if let Some(message) = &self.unreachable {
                return Err(Error::Provider(message.clone()));
            }
            Ok(Arc::new(self.backend.clone()) as Arc<dyn AgentBackend>)
        })
    }
}
