//! reelkeeper CLI entry point.
//!
//! Called from the test framework's hooks: `record` at each test teardown,
//! `finish` at session end. `resolve`, `wait`, `capabilities` and `manifest`
//! expose the individual steps for wiring and debugging.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use reelkeeper::config::Config;
use reelkeeper::manifest::ManifestStore;
use reelkeeper::processor::BatchPostProcessor;
use reelkeeper::record::ExecutionId;
use reelkeeper::report::ReportDirectory;
use reelkeeper::resolver::ContainerResolver;
use reelkeeper::runtime::docker::DockerRuntime;
use reelkeeper::runtime::{ContainerRuntime, UnavailableRuntime};
use reelkeeper::session::{GridCapabilities, SessionHooks, TestTeardown};
use reelkeeper::waiter::DestructionWaiter;

/// Environment variable pytest-xdist sets in worker processes.
const XDIST_WORKER_ENV: &str = "PYTEST_XDIST_WORKER";

/// reelkeeper — keep or discard browser-grid test videos.
#[derive(Parser)]
#[command(name = "reelkeeper", version, about)]
struct Cli {
    /// Config file path (overrides the default search).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Test outcome reported at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Outcome {
    /// The test body passed.
    Passed,
    /// The test body failed.
    Failed,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Record the video decision for a finished test (teardown hook).
    Record {
        /// Test framework node id.
        #[arg(long)]
        node_id: String,
        /// Short test name.
        #[arg(long)]
        test_name: String,
        /// Execution id the browser container was labeled with.
        #[arg(long)]
        execution_id: String,
        /// Grid session id.
        #[arg(long)]
        session_id: Option<String>,
        /// Known container id; skips label resolution.
        #[arg(long)]
        container_id: Option<String>,
        /// Video file name; omit when recording was disabled.
        #[arg(long)]
        video: Option<String>,
        /// How the test ended.
        #[arg(long, value_enum)]
        outcome: Outcome,
    },
    /// Process the manifest once the session is over (session-finish hook).
    Finish {
        /// This process is a parallel worker; do nothing.
        #[arg(long)]
        worker: bool,
    },
    /// Print the container carrying an execution id label.
    Resolve {
        /// Execution id label value.
        execution_id: String,
    },
    /// Block until a container has been destroyed.
    Wait {
        /// Container id.
        container_id: String,
    },
    /// Print grid capabilities for a new browser session.
    Capabilities {
        /// Test name used for the session and video file name.
        #[arg(long)]
        test_name: String,
        /// Reuse an execution id instead of generating one.
        #[arg(long)]
        execution_id: Option<String>,
    },
    /// Print pending manifest records.
    Manifest,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let _logging_guard = match &cli.log_dir {
        Some(dir) => Some(reelkeeper::logging::init_with_file(dir, &config.logging.level)?),
        None => {
            reelkeeper::logging::init_cli(&config.logging.level);
            None
        }
    };

    match cli.command {
        Command::Record {
            node_id,
            test_name,
            execution_id,
            session_id,
            container_id,
            video,
            outcome,
        } => {
            let teardown = TestTeardown {
                node_id,
                test_name,
                execution_id: ExecutionId::from_raw(execution_id),
                session_id,
                container_id,
                video,
                passed: outcome == Outcome::Passed,
            };
            handle_record(&config, &teardown).await
        }
        Command::Finish { worker } => handle_finish(&config, worker).await,
        Command::Resolve { execution_id } => handle_resolve(&config, &execution_id).await,
        Command::Wait { container_id } => handle_wait(&config, &container_id).await,
        Command::Capabilities {
            test_name,
            execution_id,
        } => handle_capabilities(&config, &test_name, execution_id),
        Command::Manifest => handle_manifest(&config),
    }
}

/// Connect to Docker, degrading to an unreachable stand-in.
fn connect_runtime() -> Arc<dyn ContainerRuntime> {
    match DockerRuntime::connect() {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            warn!(error = %e, "docker client unavailable");
            Arc::new(UnavailableRuntime::new(e.to_string()))
        }
    }
}

fn build_hooks(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> SessionHooks {
    SessionHooks::new(
        ManifestStore::new(config.results.manifest_path()),
        ContainerResolver::new(runtime, config.runtime.label_key.clone()),
        config.video.record,
    )
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let rendered = serde_json::to_string(value).context("failed to encode output")?;
    println!("{rendered}");
    Ok(())
}

async fn handle_record(config: &Config, teardown: &TestTeardown) -> anyhow::Result<()> {
    let hooks = build_hooks(config, connect_runtime());
    if let Some(record) = hooks.on_teardown(teardown).await {
        print_json(&record)?;
    }
    Ok(())
}

async fn handle_finish(config: &Config, worker: bool) -> anyhow::Result<()> {
    let is_worker = worker || std::env::var_os(XDIST_WORKER_ENV).is_some();
    let runtime = connect_runtime();

    let processor = BatchPostProcessor::new(
        ManifestStore::new(config.results.manifest_path()),
        DestructionWaiter::new(Arc::clone(&runtime)).with_max_wait(config.runtime.max_wait()),
        ReportDirectory::new(config.results.dir.clone()),
        config.results.video_dir().to_path_buf(),
    );
    let hooks = build_hooks(config, runtime);

    if let Some(summary) = hooks.on_session_finish(&processor, is_worker).await {
        print_json(&summary)?;
    }
    Ok(())
}

async fn handle_resolve(config: &Config, execution_id: &str) -> anyhow::Result<()> {
    let resolver = ContainerResolver::new(connect_runtime(), config.runtime.label_key.clone());
    let id = ExecutionId::from_raw(execution_id);
    match resolver.resolve(&id).await {
        Some(container_id) => {
            println!("{container_id}");
            Ok(())
        }
        None => anyhow::bail!(
            "no container labeled {}={execution_id}",
            resolver.label_key()
        ),
    }
}

async fn handle_wait(config: &Config, container_id: &str) -> anyhow::Result<()> {
    let waiter =
        DestructionWaiter::new(connect_runtime()).with_max_wait(config.runtime.max_wait());
    let outcome = waiter.block_until_destroyed(Some(container_id)).await;
    println!("{outcome}");
    Ok(())
}

fn handle_capabilities(
    config: &Config,
    test_name: &str,
    execution_id: Option<String>,
) -> anyhow::Result<()> {
    let execution_id = execution_id.map_or_else(ExecutionId::generate, ExecutionId::from_raw);
    let caps = GridCapabilities::new(
        &execution_id,
        test_name,
        &config.video,
        &config.runtime.label_key,
    );
    print_json(&serde_json::json!({
        "execution_id": execution_id.as_str(),
        "capabilities": caps.to_capability(),
    }))
}

fn handle_manifest(config: &Config) -> anyhow::Result<()> {
    let store = ManifestStore::new(config.results.manifest_path());
    let records = store
        .read_all()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    for record in &records {
        print_json(record)?;
    }
    Ok(())
}
