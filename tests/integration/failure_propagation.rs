//! Failure handling: skips, timeouts and independent branches.

use std::time::Duration;

use agentgraph::backend::ScriptedBackend;
use agentgraph::{NodeErrorKind, NodeStatus, RunOptions, Runner};

use crate::fixtures::{chain, diamond, runner, Harness};

/// Test: Failure in the middle of a chain
/// Given step0 -> step1 -> step2 -> step3 where step1 fails
/// When the graph runs
/// Then step0 completes, step1 fails, step2 and step3 are skipped
#[tokio::test]
async fn test_chain_failure_skips_everything_downstream() {
    let mut harness = Harness::new(ScriptedBackend::new().fail_when("step1", "model overloaded"));
    let ids = chain(&mut harness, 4);

    let result = runner(4).run(&mut harness.graph).await.unwrap();

    assert!(!result.success);
    assert!(result.response(&ids[0]).is_some());
    assert_eq!(result.error_for(&ids[1]).unwrap().kind, NodeErrorKind::AgentInvocation);
    for id in &ids[2..] {
        assert_eq!(
            result.error_for(id).unwrap().kind,
            NodeErrorKind::SkippedDependency { upstream: ids[1] }
        );
    }
    assert_eq!(harness.backend.call_count(), 2);

    // errors come back in dependency order
    let order: Vec<_> = result.errors.iter().map(|e| e.node_id).collect();
    assert_eq!(order, ids[1..].to_vec());
}

/// Test: Independent branches keep running
/// Given a diamond where the left branch fails
/// When the graph runs
/// Then the right branch still completes and only the join is skipped
#[tokio::test]
async fn test_sibling_branch_completes_when_other_fails() {
    let mut harness = Harness::new(ScriptedBackend::new().fail_when("left", "boom"));
    let [root, left, right, join] = diamond(&mut harness);

    let result = runner(4).run(&mut harness.graph).await.unwrap();

    assert!(result.response(&root).is_some());
    assert!(result.response(&right).is_some());
    assert_eq!(result.error_for(&left).unwrap().kind, NodeErrorKind::AgentInvocation);
    assert!(result.error_for(&join).unwrap().is_skip());
    assert_eq!(result.completed_count(), 2);
    assert_eq!(harness.graph.status(&right), Some(&NodeStatus::Completed));
}

#[tokio::test]
async fn test_unrelated_component_unaffected() {
    let mut harness = Harness::new(ScriptedBackend::new().fail_when("broken", "nope"));
    let broken = harness.add("broken", &[]);
    let downstream = harness.add("downstream", &[broken]);
    let healthy = harness.add("healthy", &[]);
    let after_healthy = harness.add("after_healthy", &[healthy]);

    let result = runner(1).run(&mut harness.graph).await.unwrap();

    assert!(result.error_for(&downstream).unwrap().is_skip());
    assert!(result.response(&after_healthy).is_some());
    assert_eq!(result.failed().count(), 1);
    assert_eq!(result.skipped().count(), 1);
}

/// Test: Timeout
/// Given a node slower than the node timeout
/// When the graph runs
/// Then it is recorded as a timeout and its dependents are skipped
#[tokio::test]
async fn test_slow_node_times_out() {
    let backend = ScriptedBackend::new().delay_when("slow", Duration::from_secs(10));
    let mut harness = Harness::new(backend);
    let fast = harness.add("fast", &[]);
    let slow = harness.add("slow", &[]);
    let after = harness.add("after", &[slow]);

    let runner = Runner::new(RunOptions {
        max_concurrency: 2,
        node_timeout: Duration::from_millis(100),
    });
    let result = runner.run(&mut harness.graph).await.unwrap();

    assert!(result.response(&fast).is_some());
    let timeout = result.error_for(&slow).unwrap();
    assert_eq!(timeout.kind, NodeErrorKind::Timeout);
    assert!(timeout.message.contains("timed out"));
    assert_eq!(
        result.error_for(&after).unwrap().kind,
        NodeErrorKind::SkippedDependency { upstream: slow }
    );
    assert!(matches!(
        harness.graph.status(&slow),
        Some(NodeStatus::Failed { .. })
    ));
}

#[tokio::test]
async fn test_blank_response_fails_node() {
    let mut harness = Harness::new(ScriptedBackend::new().reply_when("quiet", "  \n"));
    let quiet = harness.add("quiet", &[]);

    let result = runner(1).run(&mut harness.graph).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_for(&quiet).unwrap().kind, NodeErrorKind::AgentInvocation);
}

#[tokio::test]
async fn test_rerun_after_failure_starts_fresh() {
    let mut harness = Harness::new(ScriptedBackend::new().fail_when("flaky", "first try"));
    let flaky = harness.add("flaky", &[]);
    let next = harness.add("next", &[flaky]);

    let first = runner(2).run(&mut harness.graph).await.unwrap();
    assert!(first.error_for(&next).unwrap().is_skip());

    let second = runner(2).run(&mut harness.graph).await.unwrap();
    assert!(!second.success);
    assert_eq!(second.errors.len(), 2);
    assert_eq!(harness.backend.call_count(), 2);
}
