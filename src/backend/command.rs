//! External-process backend.
//!
//! Runs `<program> <args...> <prompt>` in the current directory and treats
//! stdout as the response. Every `{model}` in the arguments is replaced by
//! the agent's model selector. When the program prints a headless JSON
//! envelope (`{"type":"result","subtype":"success","result":"..."}`), the
//! `result` text is unwrapped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::process::Command;

use crate::agent::{AgentBackend, AgentProvider, AgentSpec, InvocationRequest};
use crate::config::{Config, DEFAULT_NODE_TIMEOUT_SECS};
use crate::{glog_debug, glog_trace, Error, Result};

const MODEL_PLACEHOLDER: &str = "{model}";

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arguments for `request`, prompt last.
    pub fn command_args(&self, request: &InvocationRequest) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(MODEL_PLACEHOLDER, &request.model))
            .collect();
        args.push(request.full_prompt());
        args
    }

    async fn run(&self, request: &InvocationRequest) -> Result<String> {
        let args = self.command_args(request);
        glog_debug!(
            "CommandBackend: {} for agent {} ({} args)",
            self.program.display(),
            request.agent,
            args.len()
        );

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(|e| {
            Error::AgentInvocation(format!("failed to spawn {}: {}", self.program.display(), e))
        })?;

        let stdout = String::from_utf8(output.stdout).map_err(|_| {
            Error::AgentInvocation(format!("{} produced non-UTF-8 output", request.agent))
        })?;
        glog_trace!("CommandBackend stdout: {}", stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    self.program.display(),
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::AgentInvocation(message));
        }

        parse_output(&stdout)
    }
}

/// Unwrap a headless JSON envelope, or return trimmed plain text.
pub(crate) fn parse_output(stdout: &str) -> Result<String> {
    let trimmed = stdout.trim();
    let Ok(raw) = serde_json::from_str::<RawEnvelope>(trimmed) else {
        return Ok(trimmed.to_string());
    };

    let failed = raw.is_error || raw.subtype.as_deref().is_some_and(|s| s.starts_with("error"));
    if failed || (raw.result.is_none() && raw.error.is_some()) {
        let message = raw
            .error
            .or(raw.result)
            .unwrap_or_else(|| "agent reported an error".to_string());
        return Err(Error::AgentInvocation(message));
    }

    match raw.result {
        Some(result) => Ok(result.trim().to_string()),
        // Some other JSON document: hand it through untouched.
        None => Ok(trimmed.to_string()),
    }
}

impl AgentBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn invoke<'a>(&'a self, request: &'a InvocationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.run(request))
    }
}

/// Builds [`CommandBackend`]s from a command line such as
/// `claude -p --model {model}`.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(command_line: &str, timeout: Duration) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| Error::Configuration("agent command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.effective_command(), config.node_timeout())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl AgentProvider for CommandProvider {
    fn connect<'a>(&'a self, spec: &'a AgentSpec) -> BoxFuture<'a, Result<Arc<dyn AgentBackend>>> {
        Box::pin(async move {
            let program = which::which(&self.program).map_err(|_| {
                Error::Provider(format!(
                    "agent command '{}' not found for {}",
                    self.program, spec.name
                ))
            })?;
            let backend = CommandBackend::new(program, self.args.clone()).with_timeout(self.timeout);
            Ok(Arc::new(backend) as Arc<dyn AgentBackend>)
        })
    }
}
