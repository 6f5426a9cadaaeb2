//! Runner for task graphs.
//!
//! The runner walks the graph in dependency order, dispatching every node
//! whose dependencies have all completed to its agent, up to
//! `max_concurrency` invocations at a time. Each invocation runs as its own
//! tokio task and reports back over an mpsc channel. A failed node causes
//! all of its transitive dependents to be skipped; unrelated branches keep
//! running.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::ContextEntry;
use crate::config::{DEFAULT_MAX_CONCURRENCY, DEFAULT_NODE_TIMEOUT_SECS};
use crate::core::{Graph, NodeId};
use crate::error::{Error, Result};
use crate::orchestration::result::{NodeError, NodeOutput, RunResult};
use crate::{glog, glog_debug, glog_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound on simultaneous agent invocations. Zero is treated as one.
    pub max_concurrency: usize,
    pub node_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
        }
    }
}

/// Lifecycle events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    NodeStarted {
        node_id: NodeId,
        name: String,
        agent: String,
    },
    NodeCompleted {
        node_id: NodeId,
        name: String,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: NodeId,
        name: String,
        error: NodeError,
    },
    NodeSkipped {
        node_id: NodeId,
        name: String,
        reason: NodeError,
    },
    RunFinished {
        success: bool,
        completed: usize,
        failed: usize,
        skipped: usize,
        elapsed_ms: u64,
    },
}

type Completion = (NodeId, Result<String>);

/// Bookkeeping for one `run()` call.
struct RunState {
    remaining: HashMap<NodeId, usize>,
    ready: VecDeque<NodeId>,
    in_flight: HashMap<NodeId, JoinHandle<()>>,
    outputs: HashMap<NodeId, String>,
    errors: HashMap<NodeId, NodeError>,
}

pub struct Runner {
    options: RunOptions,
    event_tx: Option<mpsc::Sender<RunEvent>>,
    cancel: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunOptions::default())
    }
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send [`RunEvent`]s to `tx`. A closed receiver does not affect the run.
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Stop the run when `token` is cancelled.
    ///
    /// A cancelled token stays cancelled, so every later `run()` on this
    /// runner ends immediately with all nodes `Cancelled`. Build a new
    /// runner (or pass a fresh token) to run again.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Token that cancels this runner's runs. Cancelling it spends the runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every node of `graph`.
    ///
    /// Node statuses are reset first, so a graph can be run repeatedly.
    /// Node failures, timeouts, skips and cancellation are reported in the
    /// returned [`RunResult`]; `Err` is reserved for faults of the runner
    /// itself.
    pub async fn run(&self, graph: &mut Graph) -> Result<RunResult> {
        let started = Instant::now();
        graph.reset();
        let order = graph.topological_order()?;
        let max = self.options.max_concurrency.max(1);

        glog!(
            "Run '{}': {} nodes, max_concurrency={}, node_timeout={:?}",
            graph.name(),
            order.len(),
            max,
            self.options.node_timeout
        );

        let remaining: HashMap<NodeId, usize> = order
            .iter()
            .map(|id| (*id, graph.dependencies(id).len()))
            .collect();
        let ready = order
            .iter()
            .filter(|id| remaining.get(*id) == Some(&0))
            .copied()
            .collect();
        let mut state = RunState {
            remaining,
            ready,
            in_flight: HashMap::new(),
            outputs: HashMap::new(),
            errors: HashMap::new(),
        };

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

        let cancelled = loop {
            if self.cancel.is_cancelled() {
                break true;
            }
            while state.in_flight.len() < max {
                let Some(id) = state.ready.pop_front() else {
                    break;
                };
                self.dispatch(graph, &mut state, id, &done_tx).await;
            }
            if state.in_flight.is_empty() {
                break false;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break true,
                message = done_rx.recv() => {
                    let Some((id, outcome)) = message else {
                        return Err(Error::TaskJoin("completion channel closed".to_string()));
                    };
                    state.in_flight.remove(&id);
                    self.finish(graph, &mut state, id, outcome).await;
                }
            }
        };

        if cancelled {
            self.cancel_remaining(graph, &mut state, &mut done_rx).await;
        }

        let errors: Vec<NodeError> = order
            .iter()
            .filter_map(|id| state.errors.remove(id))
            .collect();
        let success = errors.is_empty() && state.outputs.len() == order.len();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failed = errors.iter().filter(|e| !e.is_skip()).count();
        let skipped = errors.len() - failed;
        glog!(
            "Run '{}' finished: success={} completed={} failed={} skipped={} in {}ms",
            graph.name(),
            success,
            state.outputs.len(),
            failed,
            skipped,
            elapsed_ms
        );
        self.emit(RunEvent::RunFinished {
            success,
            completed: state.outputs.len(),
            failed,
            skipped,
            elapsed_ms,
        })
        .await;

        Ok(RunResult {
            graph: graph.name().to_string(),
            success,
            results: state.outputs,
            errors,
            elapsed_ms,
        })
    }

    /// Start `id` on its agent with its dependencies' responses as context.
    async fn dispatch(
        &self,
        graph: &mut Graph,
        state: &mut RunState,
        id: NodeId,
        done_tx: &mpsc::UnboundedSender<Completion>,
    ) {
        let Some(node) = graph.node(&id) else {
            return;
        };
        let name = node.label();
        let prompt = node.prompt.clone();
        let Some(agent) = graph.agent(&node.agent_id).cloned() else {
            let error = Error::AgentNotFound(node.agent_id);
            self.record_failure(graph, state, id, error).await;
            return;
        };

        let context: Vec<ContextEntry> = graph
            .dependencies(&id)
            .into_iter()
            .filter_map(|dep| {
                let raw = state.outputs.get(&dep)?;
                Some(ContextEntry {
                    node_id: dep,
                    name: graph.label(&dep),
                    response: NodeOutput::response_of(raw).unwrap_or_else(|| raw.clone()),
                })
            })
            .collect();
        let request = agent.request(&prompt, context);

        if let Some(node) = graph.node_mut(&id) {
            node.start();
        }
        glog_debug!(
            "Node {} ({}) started on agent {} [{}]",
            id.short(),
            name,
            agent.name(),
            agent.backend_name()
        );
        self.emit(RunEvent::NodeStarted {
            node_id: id,
            name,
            agent: agent.name().to_string(),
        })
        .await;

        let timeout = self.options.node_timeout;
        let tx = done_tx.clone();
        let handle = tokio::spawn(async move {
            let invocation = async {
                match tokio::time::timeout(timeout, agent.invoke(id, &request)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(timeout)),
                }
            };
            let outcome = AssertUnwindSafe(invocation)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::AgentInvocation("agent task panicked".to_string()))
                });
            let _ = tx.send((id, outcome));
        });
        state.in_flight.insert(id, handle);
    }

    async fn finish(
        &self,
        graph: &mut Graph,
        state: &mut RunState,
        id: NodeId,
        outcome: Result<String>,
    ) {
        let raw = match outcome {
            Ok(raw) => raw,
            Err(error) => {
                self.record_failure(graph, state, id, error).await;
                return;
            }
        };

        let mut duration_ms = 0;
        if let Some(node) = graph.node_mut(&id) {
            node.complete();
            duration_ms = node
                .duration()
                .map(|d| d.num_milliseconds().max(0) as u64)
                .unwrap_or(0);
        }
        state.outputs.insert(id, raw);
        let name = graph.label(&id);
        glog_debug!("Node {} ({}) completed in {}ms", id.short(), name, duration_ms);
        self.emit(RunEvent::NodeCompleted {
            node_id: id,
            name,
            duration_ms,
        })
        .await;

        for dependent in graph.dependents(&id) {
            let Some(count) = state.remaining.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            let pending = graph.node(&dependent).is_some_and(|n| n.is_pending());
            if *count == 0 && pending {
                state.ready.push_back(dependent);
            }
        }
    }

    /// Mark `id` failed and skip everything downstream of it.
    async fn record_failure(&self, graph: &mut Graph, state: &mut RunState, id: NodeId, error: Error) {
        let name = self.mark_failed(graph, state, id, error).await;

        let mut queue: VecDeque<NodeId> = graph.dependents(&id).into();
        while let Some(dependent) = queue.pop_front() {
            let pending = graph.node(&dependent).is_some_and(|n| n.is_pending());
            if !pending {
                continue;
            }
            let reason = NodeError::skipped(dependent, id, &name);
            self.skip(graph, state, dependent, reason).await;
            queue.extend(graph.dependents(&dependent));
        }
    }

    /// Mark `id` failed without touching its dependents. Returns its label.
    async fn mark_failed(&self, graph: &mut Graph, state: &mut RunState, id: NodeId, error: Error) -> String {
        let name = graph.label(&id);
        let node_error = NodeError::from_error(id, &error);
        glog_warn!("Node {} ({}) failed: {}", id.short(), name, error);
        if let Some(node) = graph.node_mut(&id) {
            node.fail(&node_error.message);
        }
        state.errors.insert(id, node_error.clone());
        self.emit(RunEvent::NodeFailed {
            node_id: id,
            name: name.clone(),
            error: node_error,
        })
        .await;
        name
    }

    async fn skip(&self, graph: &mut Graph, state: &mut RunState, id: NodeId, reason: NodeError) {
        if let Some(node) = graph.node_mut(&id) {
            node.skip(&reason.message);
        }
        let name = graph.label(&id);
        glog_debug!("Node {} ({}) skipped: {}", id.short(), name, reason.message);
        state.errors.insert(id, reason.clone());
        self.emit(RunEvent::NodeSkipped {
            node_id: id,
            name,
            reason,
        })
        .await;
    }

    /// Settle a cancelled run: keep completions that already arrived, abort
    /// the rest of the in-flight work and mark everything unstarted.
    async fn cancel_remaining(
        &self,
        graph: &mut Graph,
        state: &mut RunState,
        done_rx: &mut mpsc::UnboundedReceiver<Completion>,
    ) {
        glog_warn!(
            "Run '{}' cancelled with {} nodes in flight",
            graph.name(),
            state.in_flight.len()
        );

        while let Ok((id, outcome)) = done_rx.try_recv() {
            if state.in_flight.remove(&id).is_some() {
                self.finish(graph, state, id, outcome).await;
            }
        }

        let mut aborted: Vec<NodeId> = state.in_flight.keys().copied().collect();
        aborted.sort();
        for id in aborted {
            if let Some(handle) = state.in_flight.remove(&id) {
                handle.abort();
            }
            self.mark_failed(graph, state, id, Error::Cancelled).await;
        }

        // dependents of aborted nodes are still pending and land here
        state.ready.clear();
        let pending: Vec<NodeId> = graph
            .nodes()
            .filter(|n| n.is_pending())
            .map(|n| n.id)
            .collect();
        for id in pending {
            self.skip(graph, state, id, NodeError::cancelled(id)).await;
        }
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

impl Graph {
    /// Run the graph with default [`RunOptions`].
    pub async fn run(&mut self) -> Result<RunResult> {
        Runner::default().run(self).await
    }
}
