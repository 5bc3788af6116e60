use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dago_core::config::AppConfig;
use dago_core::traits::{StateStore, StreamBroker, ToolBackend};
use dago_core::types::{GraphState, NodeType, WorkItem};
use dago_engine::{Executor, ExecutorOptions};
use dago_mcp::McpToolBackend;
use dago_store::SqliteStore;
use dago_tools::{FunctionRegistry, ToolRouter};
use dago_worker::{HealthServer, Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "dago-worker", version, about = "Graph node executor worker")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "dago.toml", env = "DAGO_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume work from the intake stream (default)
    Run,
    /// Show the effective configuration
    Config,
    /// List the tools nodes can call
    Tools,
    /// Enqueue a work item on the intake stream
    Submit {
        #[arg(long)]
        graph_id: String,
        #[arg(long)]
        node_id: String,
        /// Node configuration as a JSON object
        #[arg(long, default_value = "{}")]
        config: String,
        /// Upstream node ids (informational)
        #[arg(long = "dependency")]
        dependencies: Vec<String>,
    },
    /// Create a graph state with the given inputs
    Seed {
        #[arg(long)]
        graph_id: String,
        /// Graph inputs as a JSON object
        #[arg(long, default_value = "{}")]
        inputs: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    config.apply_env_overrides()?;

    init_logging(&config.log.level);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Tools => {
            let (mcp, router) = build_tools(&config).await;
            let tools = router.list_tools().await?;
            if tools.is_empty() {
                println!("No tools available.");
            }
            for name in tools {
                println!("{}", name);
            }
            mcp.manager().disconnect_all().await;
        }
        Commands::Submit {
            graph_id,
            node_id,
            config: node_config,
            dependencies,
        } => {
            let item = WorkItem {
                graph_id,
                node_id,
                node_type: NodeType::Executor,
                config: parse_object(&node_config, "--config")?,
                dependencies,
            };
            let store = open_store(&config)?;
            let id = store
                .add(
                    &config.worker.stream,
                    vec![("data".to_string(), serde_json::to_string(&item)?)],
                )
                .await?;
            println!("{}", id);
        }
        Commands::Seed { graph_id, inputs } => {
            let state = GraphState::new(graph_id, parse_object(&inputs, "--inputs")?);
            let store = open_store(&config)?;
            store.save(&state).await?;
            println!("Seeded graph {}", state.graph_id);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level applies to dago crates.
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("dago={},warn", level))),
        )
        .with_target(false)
        .init();
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let path = config.store.resolved_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?
        .with_ttl(Duration::from_secs(config.store.state_ttl_secs));
    Ok(store)
}

/// MCP servers first, local functions as the fallback.
async fn build_tools(config: &AppConfig) -> (Arc<McpToolBackend>, Arc<ToolRouter>) {
    let mcp = Arc::new(McpToolBackend::connect_all(&config.mcp).await);
    let functions = Arc::new(FunctionRegistry::with_builtins());
    let router = Arc::new(ToolRouter::with_fallback(mcp.clone(), functions));
    (mcp, router)
}

fn parse_object(text: &str, flag: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", flag))? {
        Value::Object(map) => Ok(map),
        other => bail!("{} must be a JSON object, got {}", flag, other),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker_id = %config.worker.id,
        "Starting executor worker"
    );

    let store = Arc::new(open_store(&config)?);
    store.ping().await.context("store is not reachable")?;
    info!(path = %config.store.resolved_path().display(), "Store ready");

    let llm = dago_llm::create_client(&config.model)?;
    info!(provider = %config.model.provider, model = %config.model.model_id, "LLM client ready");

    let (mcp, tools) = build_tools(&config).await;
    let executor = Arc::new(Executor::new(
        llm,
        tools,
        ExecutorOptions {
            max_iterations: config.agent.max_iterations,
            default_model: config.model.model_id.clone(),
        },
    ));

    let worker_config = WorkerConfig::from(&config.worker);
    let shutdown_timeout = worker_config.shutdown_timeout;
    let worker = Arc::new(Worker::new(
        worker_config,
        store.clone(),
        store.clone(),
        executor,
    ));

    let shutdown = CancellationToken::new();
    let health = if config.health.enabled {
        let server = HealthServer::bind(&config.health.bind, worker.clone())
            .await
            .with_context(|| format!("failed to bind health server on {}", config.health.bind))?;
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                error!(error = %e, "Health server error");
            }
        }))
    } else {
        None
    };

    worker.start().await?;
    info!(worker_id = %worker.id(), health = %config.health.bind, "Executor worker started");

    wait_for_signal().await;
    info!("Received shutdown signal");

    shutdown.cancel();
    if let Some(handle) = health {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!("Health server did not shut down in time");
        }
    }
    if let Err(e) = worker.stop().await {
        error!(error = %e, "Worker shutdown error");
    }
    mcp.manager().disconnect_all().await;

    info!("Executor worker shut down");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
