// Waypoint CLI
// Inspect and dry-run process definitions from the command line
// Run with: cargo run --bin waypoint -- check demos/review.json

//! # Waypoint CLI
//!
//! - `check`: validate a definition and report unreachable activities
//! - `paths`: print the decision paths leaving every activity
//! - `simulate`: start a process in memory and keep resolving the first
//!   pending work item that can be resolved
//!
//! Engine settings come from `WAYPOINT_*` environment variables (a `.env`
//! file is honoured); log verbosity from `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waypoint::engine::instance::read_process;
use waypoint::engine::{InMemoryDefinitionRegistry, PendingWorkItem};
use waypoint::{
    EngineConfig, ProcessDefinition, ProcessInstanceId, ProcessStatus, RequestContext, Resolution,
    RuntimeContext, WorkflowEngine, WriteTransaction,
};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Waypoint - inspect and simulate process definitions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a definition
    Check {
        /// Definition file (JSON)
        definition: PathBuf,
    },

    /// List decision paths leaving each activity
    Paths {
        definition: PathBuf,
    },

    /// Run a process in memory, resolving work items in order
    Simulate {
        definition: PathBuf,

        /// Positional start argument as JSON, repeatable
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Maximum number of work items to resolve
        #[arg(long, default_value_t = 32)]
        steps: usize,
    },
}

fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("waypoint=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("waypoint=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig::from_env();
    match cli.command {
        Commands::Check { definition } => check(&definition),
        Commands::Paths { definition } => paths(&definition, &config),
        Commands::Simulate {
            definition,
            args,
            steps,
        } => simulate(&definition, &args, steps, config),
    }
}

fn load(path: &Path) -> Result<ProcessDefinition> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let definition: ProcessDefinition =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(definition)
}

fn check(path: &Path) -> Result<()> {
    let definition = load(path)?;
    definition.validate()?;

    let unreachable = definition.find_unreachable_activities();
    for activity in &unreachable {
        warn!(activity = %activity, "activity is unreachable from any start");
    }

    println!(
        "{}: {} activities, {} transitions, {} unreachable",
        definition.id,
        definition.activities.len(),
        definition.transitions.len(),
        unreachable.len()
    );
    Ok(())
}

fn paths(path: &Path, config: &EngineConfig) -> Result<()> {
    let definition = load(path)?;
    definition.validate()?;

    for activity in &definition.activities {
        if activity.kind.is_gateway() {
            continue;
        }
        for decision in definition.decision_paths_from(&activity.id, config.max_path_depth)? {
            let transitions: Vec<&str> = decision.transitions().map(|t| t.as_str()).collect();
            let targets: Vec<&str> = decision.targets().iter().map(|t| t.as_str()).collect();
            println!("{} -> [{}] via {}", activity.id, targets.join(", "), transitions.join(", "));
        }
    }
    Ok(())
}

fn simulate(path: &Path, raw_args: &[String], steps: usize, config: EngineConfig) -> Result<()> {
    let args = raw_args
        .iter()
        .map(|raw| serde_json::from_str(raw).with_context(|| format!("argument {} is not JSON", raw)))
        .collect::<Result<Vec<serde_json::Value>>>()?;

    let registry = Arc::new(InMemoryDefinitionRegistry::new());
    let definition = registry.register(load(path)?)?;
    let engine = WorkflowEngine::new(RuntimeContext::in_memory(registry, config));

    let request = RequestContext::for_principal("waypoint-cli");
    let txn = WriteTransaction::begin(&request);

    let mut items = engine.startable_work_items(&definition.id)?;
    let Some(item) = items.first_mut() else {
        bail!("{} has no startable path", definition.id);
    };
    let started = match engine.start(item, &request, &txn, &args)? {
        Resolution::Completed(started) => started,
        Resolution::Rejected(reason) => bail!("start rejected: {:?}", reason),
    };
    info!(process = %started.process_id, "simulation started");

    let process = started.process_id;
    for step in 0..steps {
        if engine.context().runtime.is_archived(process) {
            break;
        }
        if !advance(&engine, process, &request, &txn)? {
            warn!(step, "no pending work item can be resolved");
            break;
        }
    }

    let status = {
        let instance = read_process(&started.process)?;
        for event in instance.history() {
            println!("{}", serde_json::to_string(event)?);
        }
        let active: Vec<&str> = instance.active_nodes().iter().map(|a| a.as_str()).collect();
        println!("status: {:?}, active: [{}]", instance.status(), active.join(", "));
        instance.status()
    };
    if status != ProcessStatus::Finished {
        let pending: Vec<PendingWorkItem> = engine.pending_work_items(process).unwrap_or_default();
        println!("pending: {}", serde_json::to_string(&pending)?);
    }
    Ok(())
}

/// Resolve the first pending work item that accepts; false when none does
fn advance(
    engine: &WorkflowEngine,
    process: ProcessInstanceId,
    request: &RequestContext,
    txn: &WriteTransaction,
) -> Result<bool> {
    for item in engine.pending_work_items(process)? {
        let accepted = match item.kind {
            "decision" => engine.resolve(process, item.id, request, txn)?.is_completed(),
            _ => engine.complete(process, item.id, request, txn)?.is_completed(),
        };
        if accepted {
            info!(work_item = %item.id, kind = item.kind, node = %item.node, "resolved");
            return Ok(true);
        }
    }
    Ok(false)
}
