//! Pipeline files built and run end to end.

use agentgraph::backend::{EchoProvider, ScriptedBackend, ScriptedProvider};
use agentgraph::{Error, NodeErrorKind, NodeOutput, NodeStatus, Pipeline};
use tokio_test::{assert_err, assert_ok};

use crate::fixtures::{pipeline_file, CONTENT_PIPELINE};

/// Test: Content pipeline
/// Given a researcher node and a writer node that depends on it
/// When the pipeline runs
/// Then research runs first and the article sees the research as context
#[tokio::test]
async fn test_content_pipeline_runs_in_order() {
    let backend = ScriptedBackend::new()
        .reply_for("Researcher", "Agents went mainstream in 2024.")
        .reply_for("Writer", "# The Year of Agents\n...");
    let provider = ScriptedProvider::new(backend.clone());
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let pipeline = assert_ok!(Pipeline::from_file(&path));
    let mut built = assert_ok!(pipeline.build(&provider).await);
    let result = assert_ok!(built.graph.run().await);

    assert!(result.success);
    assert!(result.errors.is_empty());
    assert_eq!(result.results.len(), 2);

    let research = built.node("research").unwrap();
    let article = built.node("article").unwrap();
    assert_eq!(
        result.response(&article).as_deref(),
        Some("# The Year of Agents\n...")
    );

    let output: NodeOutput = result.parsed(&research).unwrap();
    assert_eq!(output.agent, "Researcher");
    assert_eq!(output.model, "gpt-4o");
    assert_eq!(output.node_id, research);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].request.agent, "Researcher");
    assert_eq!(calls[0].request.system_prompt, "You research topics thoroughly.");
    assert_eq!(calls[1].request.agent, "Writer");
    assert!(calls[1]
        .request
        .render()
        .contains("### research\nAgents went mainstream in 2024."));
    assert!(calls[0].finished_at.unwrap() <= calls[1].started_at);
}

/// Test: Failed research
/// Given the researcher backend fails
/// When the pipeline runs
/// Then the article is skipped, not invoked, and has no response
#[tokio::test]
async fn test_content_pipeline_research_failure() {
    let backend = ScriptedBackend::new().fail_for("Researcher", "rate limited");
    let provider = ScriptedProvider::new(backend.clone());
    let pipeline: Pipeline = CONTENT_PIPELINE.parse().unwrap();
    let mut built = pipeline.build(&provider).await.unwrap();

    let result = built.graph.run().await.unwrap();

    let research = built.node("research").unwrap();
    let article = built.node("article").unwrap();
    assert!(!result.success);
    assert!(result.response(&article).is_none());
    assert!(result.output(&article).is_none());
    assert_eq!(backend.call_count(), 1);

    let failure = result.error_for(&research).unwrap();
    assert_eq!(failure.kind, NodeErrorKind::AgentInvocation);
    assert!(failure.message.contains("rate limited"));
    assert_eq!(
        result.error_for(&article).unwrap().kind,
        NodeErrorKind::SkippedDependency { upstream: research }
    );
    assert!(matches!(
        built.graph.status(&article),
        Some(NodeStatus::Skipped { .. })
    ));
}

#[tokio::test]
async fn test_echo_provider_pipeline() {
    let mut built = CONTENT_PIPELINE
        .parse::<Pipeline>()
        .unwrap()
        .build(&EchoProvider)
        .await
        .unwrap();
    let result = built.graph.run().await.unwrap();
    let article = built.node("article").unwrap();
    assert_eq!(
        result.response(&article).as_deref(),
        Some("[Writer/gpt-4o] Write an article based on the research (with 1 context entries)")
    );
}

#[tokio::test]
async fn test_nodes_declared_out_of_order() {
    let toml = r#"
name = "reverse"
default_agent = "a"

[[agents]]
key = "a"
name = "A"
model = "m"

[[nodes]]
key = "third"
prompt = "third"
depends_on = ["second"]

[[nodes]]
key = "second"
prompt = "second"
depends_on = ["first"]

[[nodes]]
key = "first"
prompt = "first"
"#;
    let backend = ScriptedBackend::new();
    let pipeline: Pipeline = toml.parse().unwrap();
    assert_eq!(
        pipeline.execution_order().unwrap(),
        vec!["first", "second", "third"]
    );
    assert_eq!(pipeline.output_keys(), vec!["third"]);

    let mut built = pipeline
        .build(&ScriptedProvider::new(backend.clone()))
        .await
        .unwrap();
    assert!(built.graph.run().await.unwrap().success);
    assert_eq!(backend.prompts(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_cyclic_pipeline_is_rejected_before_agents_are_created() {
    let toml = r#"
name = "loop"
default_agent = "a"

[[agents]]
key = "a"
name = "A"
model = "m"

[[nodes]]
key = "x"
prompt = "x"
depends_on = ["z"]

[[nodes]]
key = "y"
prompt = "y"
depends_on = ["x"]

[[nodes]]
key = "z"
prompt = "z"
depends_on = ["y"]
"#;
    let provider = ScriptedProvider::new(ScriptedBackend::new()).unreachable("must not connect");
    let pipeline: Pipeline = toml.parse().unwrap();
    let err = assert_err!(pipeline.build(&provider).await);
    assert!(matches!(err, Error::Cycle { .. }));
}

#[test]
fn test_rerun_built_pipeline_blocking() {
    tokio_test::block_on(async {
        let backend = ScriptedBackend::new();
        let provider = ScriptedProvider::new(backend.clone());
        let mut built = CONTENT_PIPELINE
            .parse::<Pipeline>()
            .unwrap()
            .build(&provider)
            .await
            .unwrap();

        let first = built.graph.run().await.unwrap();
        let second = built.graph.run().await.unwrap();
        assert!(first.success);
        assert!(second.success);
        assert_eq!(backend.call_count(), 4);

        let article = built.node("article").unwrap();
        assert_eq!(first.response(&article), second.response(&article));
    });
}
