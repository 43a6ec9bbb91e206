use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::event::ExecutionSubscription;
use weft_core::execution::{ExecutionStatus, WorkflowExecution};
use weft_core::template::interpolate;
use weft_core::traits::WorkflowStore;
use weft_core::types::ExecutionEvent;
use weft_core::workflow::{NodeKind, Workflow};
use weft_engine::WorkflowEngine;
use weft_store::SqliteStore;
use weft_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "weft", version, about = "Workflow graph execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file and print the final execution as JSON
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Input object, e.g. '{"topic": "tides"}'
        #[arg(short, long)]
        input: Option<String>,
        /// Print execution events to stderr as they happen
        #[arg(long)]
        events: bool,
        /// Stop at human nodes instead of prompting on stdin
        #[arg(long)]
        no_interactive: bool,
        /// Save the workflow and its execution snapshot to the store
        #[arg(long)]
        save: bool,
    },
    /// Check a workflow file for structural errors and authoring problems
    Validate {
        workflow: PathBuf,
    },
    /// Start the HTTP gateway
    Serve,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weft", &mut io::stdout());
        }
        Commands::Validate { workflow } => validate(&workflow)?,
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            workflow,
            input,
            events,
            no_interactive,
            save,
        } => {
            let config = load_config(&cli.config)?;
            let workflow = read_workflow(&workflow)?;
            let inputs = parse_inputs(input.as_deref())?;
            let engine = WorkflowEngine::from_config(&config, ToolRegistry::with_builtins())?;
            let store = if save {
                Some(SqliteStore::open(&config.store_path())?)
            } else {
                None
            };

            let execution = engine.prepare(&workflow, inputs)?;
            if events {
                spawn_event_printer(engine.event_bus().subscribe_execution(&execution.id));
            }

            let execution = run_workflow(&engine, &workflow, execution, !no_interactive).await?;

            if let Some(store) = &store {
                store.save_workflow(&workflow).await?;
                store.save_execution(&execution).await?;
                info!(execution_id = %execution.id, "Execution saved");
            }

            println!("{}", serde_json::to_string_pretty(&execution)?);
            if execution.status == ExecutionStatus::Failed {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let config = load_config(&cli.config)?;
            let gateway_config = config.gateway.clone().unwrap_or_default();
            let store: Arc<dyn WorkflowStore> = Arc::new(SqliteStore::open(&config.store_path())?);
            let engine = Arc::new(WorkflowEngine::from_config(
                &config,
                ToolRegistry::with_builtins(),
            )?);
            if config.callback_url().is_none() {
                warn!("gateway.public_url not set; agent tasks will settle by polling only");
            }

            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = weft_gateway::GatewayServer::new(gateway_config, engine, store);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    warn!(
        path = %path.display(),
        "No config file found; using defaults and WEFT_INBOX_URL / WEFT_INBOX_API_KEY"
    );
    Ok(AppConfig::from_env())
}

fn read_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing workflow {}", path.display()))
}

fn parse_inputs(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).context("--input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--input must be a JSON object, got {}", other),
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let workflow = read_workflow(path)?;
    workflow.validate()?;

    let warnings = workflow.lint();
    for warning in &warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{}: {} nodes, {} edges, {} warning(s)",
        workflow.id,
        workflow.nodes.len(),
        workflow.edges.len(),
        warnings.len()
    );
    Ok(())
}

/// Run to a terminal status, answering human nodes from stdin when interactive.
async fn run_workflow(
    engine: &WorkflowEngine,
    workflow: &Workflow,
    execution: WorkflowExecution,
    interactive: bool,
) -> anyhow::Result<WorkflowExecution> {
    let mut execution = engine.run(workflow, execution).await?;

    while interactive && execution.status == ExecutionStatus::Paused {
        let Some(input) = ask_human(workflow, &execution)? else {
            engine.cancel(&mut execution)?;
            break;
        };
        execution = engine.resume(workflow, execution, input).await?;
    }
    Ok(execution)
}

/// Prompt for the waiting node's input. `None` on end of input.
fn ask_human(workflow: &Workflow, execution: &WorkflowExecution) -> anyhow::Result<Option<Value>> {
    let node_id = execution
        .waiting_entry()
        .map(|idx| execution.history[idx].node_id.clone())
        .unwrap_or_default();
    let prompt = match workflow.node(&node_id).map(|n| &n.kind) {
        Some(NodeKind::Human { prompt: Some(p) }) => interpolate(p, &execution.variables),
        _ => format!("Input for {}", node_id),
    };

    eprint!("{} > ", prompt);
    io::stderr().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim();
    // Bare text is accepted as a JSON string
    Ok(Some(
        serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())),
    ))
}

fn spawn_event_printer(mut events: ExecutionSubscription) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    eprintln!("\x1b[36m> {} ({})\x1b[0m", node_id, node_type);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    eprintln!("\x1b[31m! {}: {}\x1b[0m", node_id, error);
                }
                ExecutionEvent::AgentDispatched { node_id, message_id, .. } => {
                    eprintln!("\x1b[33m~ {} dispatched as {}\x1b[0m", node_id, message_id);
                }
                ExecutionEvent::Finished { status, .. } => {
                    eprintln!("\x1b[32m= {}\x1b[0m", status);
                }
                _ => {}
            }
        }
    });
}
