//! Cancelling a run midway.

use std::time::{Duration, Instant};

use agentgraph::backend::ScriptedBackend;
use agentgraph::{NodeErrorKind, NodeStatus, RunEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{runner, Harness};

/// Test: Cancel while a node is in flight
/// Given fast -> slow -> last and a token cancelled during slow
/// When the run returns
/// Then fast keeps its result, slow is cancelled and last never runs
#[tokio::test]
async fn test_cancel_mid_run_keeps_finished_work() {
    let backend = ScriptedBackend::new().delay_when("slow", Duration::from_secs(10));
    let mut harness = Harness::new(backend);
    let fast = harness.add("fast", &[]);
    let slow = harness.add("slow", &[fast]);
    let last = harness.add("last", &[slow]);

    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);
    let runner = runner(2).with_cancellation(token.clone()).with_events(tx);

    // cancel once the slow node has started
    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let RunEvent::NodeStarted { name, .. } = &event {
                if name == "slow" {
                    token.cancel();
                }
            }
        }
    });

    let started = Instant::now();
    let result = runner.run(&mut harness.graph).await.unwrap();
    drop(runner);
    watcher.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.response(&fast).is_some());
    assert_eq!(result.error_for(&slow).unwrap().kind, NodeErrorKind::Cancelled);
    assert_eq!(result.error_for(&last).unwrap().kind, NodeErrorKind::Cancelled);
    assert!(!harness.backend.prompts().contains(&"last".to_string()));

    assert_eq!(harness.graph.status(&fast), Some(&NodeStatus::Completed));
    assert!(matches!(
        harness.graph.status(&slow),
        Some(NodeStatus::Failed { .. })
    ));
    assert!(matches!(
        harness.graph.status(&last),
        Some(NodeStatus::Skipped { .. })
    ));
}

#[tokio::test]
async fn test_pre_cancelled_run_invokes_nothing() {
    let mut harness = Harness::new(ScriptedBackend::new());
    let a = harness.add("a", &[]);
    let b = harness.add("b", &[a]);

    let token = CancellationToken::new();
    token.cancel();
    let result = runner(4)
        .with_cancellation(token)
        .run(&mut harness.graph)
        .await
        .unwrap();

    assert_eq!(harness.backend.call_count(), 0);
    assert!(result.results.is_empty());
    assert_eq!(result.errors.len(), 2);
    assert!(result
        .errors
        .iter()
        .all(|e| e.kind == NodeErrorKind::Cancelled));
    assert_eq!(result.errors[0].node_id, a);
    assert_eq!(result.errors[1].node_id, b);
}

#[tokio::test]
async fn test_cancel_stops_parallel_nodes() {
    let backend = ScriptedBackend::new().delay_for("Worker", Duration::from_secs(10));
    let mut harness = Harness::new(backend);
    let ids: Vec<_> = (0..3).map(|i| harness.add(&format!("n{}", i), &[])).collect();

    let runner = runner(3);
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = runner.run(&mut harness.graph).await.unwrap();
    assert_eq!(harness.backend.call_count(), 3);
    for id in &ids {
        assert_eq!(result.error_for(id).unwrap().kind, NodeErrorKind::Cancelled);
    }
}
