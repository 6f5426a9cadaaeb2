use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use agentgraph::agent::AgentProvider;
use agentgraph::backend::{CommandProvider, EchoProvider};
use agentgraph::config::Config;
use agentgraph::log::LogLevel;
use agentgraph::{glog, glog_error, BuiltPipeline, Error, Pipeline, Result, RunEvent, Runner};

/// agentgraph - run multi-agent task pipelines as a dependency graph
#[derive(Parser, Debug)]
#[command(name = "agentgraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    AGENTGRAPH_DEBUG=1                Enable debug logging\n    AGENTGRAPH_COMMAND                Agent command line\n    AGENTGRAPH_MAX_CONCURRENCY        Parallel agent invocations\n    AGENTGRAPH_NODE_TIMEOUT_SECS      Per-node timeout")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.agentgraph/agentgraph.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Log threshold: error, warn, info, debug or trace
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Config file to use instead of ~/.agentgraph/config.toml
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build and run a pipeline file
    Run {
        /// Pipeline TOML file
        file: PathBuf,

        /// Where agent responses come from
        #[arg(long, value_enum, default_value_t = BackendKind::Command)]
        backend: BackendKind,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,

        /// Node keys to print (defaults to the pipeline's final nodes)
        #[arg(long = "node", value_name = "KEY")]
        nodes: Vec<String>,
    },

    /// Check a pipeline file and print its execution order
    Validate {
        /// Pipeline TOML file
        file: PathBuf,
    },

    /// Write the default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Run the configured agent command
    Command,
    /// Offline deterministic responses
    Echo,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    agentgraph::log::init_with_debug(cli.debug);
    if let Some(level) = cli.log_level {
        agentgraph::log::set_level(level);
    }

    match run_cli(cli) {
        Ok(code) => code,
        Err(e) => {
            glog_error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    glog!("agentgraph starting: {:?}", cli.command);

    match cli.command {
        Command::Run {
            file,
            backend,
            json,
            nodes,
        } => {
            let config = load_config(cli.config.as_deref())?;
            if config.debug && cli.log_level.is_none() {
                agentgraph::log::set_level(LogLevel::Debug);
            }
            run_pipeline(&config, &file, backend, json, &nodes)
        }
        Command::Validate { file } => validate_pipeline(&file),
        Command::Init { force } => {
            let path = cli.config.map(Ok).unwrap_or_else(Config::config_path)?;
            init_config(&path, force)
        }
    }
}

/// Only `run` reads the config, so `init` can replace a broken file.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => Config::load(),
    }
}

fn run_pipeline(
    config: &Config,
    file: &Path,
    backend: BackendKind,
    json: bool,
    requested: &[String],
) -> Result<ExitCode> {
    let pipeline = Pipeline::from_file(file)?;
    let keys: Vec<String> = if requested.is_empty() {
        pipeline.output_keys().into_iter().map(String::from).collect()
    } else {
        requested.to_vec()
    };
    if let Some(unknown) = keys.iter().find(|k| !pipeline.nodes.iter().any(|n| &n.key == *k)) {
        return Err(Error::Validation(format!(
            "pipeline '{}' has no node '{}'",
            pipeline.name, unknown
        )));
    }

    let provider: Box<dyn AgentProvider> = match backend {
        BackendKind::Command => Box::new(CommandProvider::from_config(config)?),
        BackendKind::Echo => Box::new(EchoProvider),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let (built, result) = rt.block_on(async {
        let mut built = pipeline.build(provider.as_ref()).await?;
        let (tx, rx) = mpsc::channel(64);
        let progress = tokio::spawn(print_progress(rx, !json));
        let runner = Runner::new(config.run_options()).with_events(tx);
        let result = runner.run(&mut built.graph).await;
        drop(runner);
        let _ = progress.await;
        Ok::<_, Error>((built, result?))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        for key in &keys {
            let response = built
                .node(key)
                .and_then(|id| result.response(&id))
                .unwrap_or_default();
            println!("{} completed: {}", key, response);
        }
    } else {
        println!("Workflow failed or no output available");
        for error in &result.errors {
            let key = built.key_of(&error.node_id).unwrap_or("unknown");
            println!("  - {} [{}]: {}", key, error.kind, error.message);
        }
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Echo run events to stderr until the runner drops its sender.
async fn print_progress(mut rx: mpsc::Receiver<RunEvent>, enabled: bool) {
    while let Some(event) = rx.recv().await {
        if !enabled {
            continue;
        }
        match event {
            RunEvent::NodeStarted { name, agent, .. } => {
                eprintln!("> {} started ({})", name, agent)
            }
            RunEvent::NodeCompleted {
                name, duration_ms, ..
            } => eprintln!("+ {} done in {}ms", name, duration_ms),
            RunEvent::NodeFailed { name, error, .. } => {
                eprintln!("x {} failed: {}", name, error.message)
            }
            RunEvent::NodeSkipped { name, reason, .. } => {
                eprintln!("- {} skipped: {}", name, reason.message)
            }
            RunEvent::RunFinished { .. } => {}
        }
    }
}

fn validate_pipeline(file: &Path) -> Result<ExitCode> {
    let pipeline = Pipeline::from_file(file)?;
    let order: Vec<String> = pipeline
        .execution_order()?
        .into_iter()
        .map(String::from)
        .collect();

    let rt = tokio::runtime::Runtime::new()?;
    let built: BuiltPipeline = rt.block_on(pipeline.build(&EchoProvider))?;

    println!(
        "Pipeline '{}' is valid: {} agents, {} nodes, {} dependencies",
        pipeline.name,
        built.graph.agent_count(),
        built.graph.node_count(),
        built.graph.dependency_count()
    );
    println!("Execution order:");
    for (i, key) in order.iter().enumerate() {
        println!("  {}. {}", i + 1, key);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_config(path: &Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }
    Config::default().save_to(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
