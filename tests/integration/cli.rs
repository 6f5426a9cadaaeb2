//! The `agentgraph` binary, run against the echo backend or a stub command.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

use crate::fixtures::{pipeline_file, CONTENT_PIPELINE};

/// Run the binary with HOME pointed at `home` so config and logs stay there.
fn agentgraph(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentgraph"))
        .args(args)
        .env("HOME", home)
        .env_remove("AGENTGRAPH_COMMAND")
        .env_remove("AGENTGRAPH_MAX_CONCURRENCY")
        .env_remove("AGENTGRAPH_NODE_TIMEOUT_SECS")
        .env_remove("AGENTGRAPH_DEBUG")
        .output()
        .expect("Failed to run agentgraph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_run_prints_sink_response() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = agentgraph(
        home.path(),
        &["run", path.to_str().unwrap(), "--backend", "echo"],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        stdout(&output).trim(),
        "article completed: [Writer/gpt-4o] Write an article based on the research (with 1 context entries)"
    );
    assert!(home.path().join(".agentgraph/agentgraph.log").exists());
}

#[test]
fn test_run_requested_nodes() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = agentgraph(
        home.path(),
        &[
            "run",
            path.to_str().unwrap(),
            "--backend",
            "echo",
            "--node",
            "research",
        ],
    );

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        "research completed: [Researcher/gpt-4o] Research AI trends in 2024"
    );
}

#[test]
fn test_run_json() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = agentgraph(
        home.path(),
        &["run", path.to_str().unwrap(), "--backend", "echo", "--json"],
    );

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["graph"], "content-pipeline");
    assert_eq!(json["results"].as_object().unwrap().len(), 2);
}

#[test]
fn test_failed_run_exits_nonzero() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = Command::new(env!("CARGO_BIN_EXE_agentgraph"))
        .args(["run", path.to_str().unwrap()])
        .env("HOME", home.path())
        .env("AGENTGRAPH_COMMAND", "false")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.starts_with("Workflow failed or no output available"));
    assert!(text.contains("research [agent invocation]"));
    assert!(text.contains("article [skipped dependency"));
}

#[test]
fn test_missing_command_binary_is_error() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = Command::new(env!("CARGO_BIN_EXE_agentgraph"))
        .args(["run", path.to_str().unwrap()])
        .env("HOME", home.path())
        .env("AGENTGRAPH_COMMAND", "agentgraph-no-such-binary -p")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error: Provider error"), "stderr: {}", stderr);
}

#[test]
fn test_validate_prints_order() {
    let home = TempDir::new().unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let output = agentgraph(home.path(), &["validate", path.to_str().unwrap()]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("2 agents, 2 nodes, 1 dependencies"));
    assert!(text.contains("1. research\n  2. article"));
}

#[test]
fn test_validate_rejects_unknown_dependency() {
    let home = TempDir::new().unwrap();
    let broken = CONTENT_PIPELINE.replace("depends_on = [\"research\"]", "depends_on = [\"ghost\"]");
    let (_dir, path) = pipeline_file("broken.toml", &broken);

    let output = agentgraph(home.path(), &["validate", path.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown node 'ghost'"));
}

#[test]
fn test_init_writes_config_once() {
    let home = TempDir::new().unwrap();
    let config = home.path().join(".agentgraph/config.toml");

    assert!(agentgraph(home.path(), &["init"]).status.success());
    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("max_concurrency = 4"));

    std::fs::write(&config, "max_concurrency = 2\n").unwrap();
    let output = agentgraph(home.path(), &["init"]);
    assert!(stdout(&output).contains("already exists"));
    assert_eq!(std::fs::read_to_string(&config).unwrap(), "max_concurrency = 2\n");

    assert!(agentgraph(home.path(), &["init", "--force"]).status.success());
    assert!(std::fs::read_to_string(&config)
        .unwrap()
        .contains("node_timeout_secs = 600"));
}

/// Test: A broken config can be repaired
/// Given a config file that fails validation
/// When validate and init --force run
/// Then neither reads it, and init replaces it with the defaults
#[test]
fn test_init_repairs_invalid_config() {
    let home = TempDir::new().unwrap();
    let config = home.path().join(".agentgraph/config.toml");
    std::fs::create_dir_all(config.parent().unwrap()).unwrap();
    std::fs::write(&config, "max_concurrency = 0\n").unwrap();
    let (_dir, path) = pipeline_file("content.toml", CONTENT_PIPELINE);

    let run = agentgraph(
        home.path(),
        &["run", path.to_str().unwrap(), "--backend", "echo"],
    );
    assert!(!run.status.success());
    assert!(String::from_utf8_lossy(&run.stderr).contains("max_concurrency must be at least 1"));

    assert!(agentgraph(home.path(), &["validate", path.to_str().unwrap()])
        .status
        .success());

    let output = agentgraph(home.path(), &["init", "--force"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(std::fs::read_to_string(&config)
        .unwrap()
        .contains("max_concurrency = 4"));
}
