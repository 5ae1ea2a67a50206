// crates/trelliscli/src/main.rs

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trelliscore::{
    ExecutionEvent, ExecutionStatus, InMemoryStepStore, NodeEvent, NodeOutput, NodeSpec, NodeType,
    TriggerEvent, Workflow,
};
use trellisruntime::{
    build_parents, prune, topological_sort, ExecutorRegistry, InMemoryExecutionStore,
    InMemoryWorkflowStore, RuntimeConfig, Stores, TrellisRuntime,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Trellis workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial trigger payload as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Idempotency key of the trigger event
        #[arg(short, long)]
        event_id: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the retry budget of every step
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            event_id,
            config,
            max_attempts,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(&file, input, event_id, config.as_deref(), max_attempts).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn standard_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    trellisnodes::register_all(&mut registry);
    registry
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("Failed to parse workflow {}", file.display()))
}

fn load_config(file: Option<&Path>) -> Result<RuntimeConfig> {
    match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(RuntimeConfig::default()),
    }
}

/// Loaded configuration with command-line overrides applied
fn runtime_config(file: Option<&Path>, max_attempts: Option<u32>) -> Result<RuntimeConfig> {
    let mut config = load_config(file)?;
    if let Some(max_attempts) = max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    Ok(config)
}

fn parse_input(input: Option<String>) -> Result<Option<NodeOutput>> {
    let Some(input_str) = input else {
        return Ok(None);
    };
    match serde_json::from_str(&input_str)? {
        serde_json::Value::Object(obj) => Ok(Some(obj)),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    event_id: Option<String>,
    config: Option<&Path>,
    max_attempts: Option<u32>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;
    let config = runtime_config(config, max_attempts)?;
    info!(
        max_attempts = config.retry.max_attempts,
        event_buffer_size = config.event_buffer_size,
        "Runtime configured"
    );
    let initial_data = parse_input(input)?;

    println!("📋 Workflow: {} ({})", workflow.name, workflow.id);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let workflow_id = workflow.id.clone();
    workflows.insert(workflow).await;

    let runtime = TrellisRuntime::new(
        standard_registry(),
        config,
        Stores {
            workflows,
            executions: executions.clone(),
            steps: Arc::new(InMemoryStepStore::new()),
        },
    );

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { execution_id, .. } => {
                    println!("▶️  Workflow started ({})", execution_id);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     📊 [{}] {}%", node_id, percent),
                    },
                    NodeEvent::Status { .. } => {}
                },
                ExecutionEvent::WorkflowCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let key = event_id.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let mut event = TriggerEvent::new(key.clone(), workflow_id);
    if let Some(data) = initial_data {
        event = event.with_initial_data(data);
    }

    info!(idempotency_key = %key, "Firing trigger event");
    let result = runtime.handle(event).await;

    // Let the listener drain what was already published
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let record = trellisruntime::ExecutionStore::get(executions.as_ref(), &key).await?;

    println!();
    println!("📊 Execution record:");
    match &record {
        Some(execution) => println!("{}", serde_json::to_string_pretty(execution)?),
        None => println!("   (none created)"),
    }

    match result {
        Ok(execution) if execution.status == ExecutionStatus::Success => Ok(()),
        Ok(execution) => bail!("Execution {} ended as {:?}", execution.id, execution.status),
        Err(e) => Err(anyhow::Error::new(e).context("Workflow run failed")),
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    workflow.validate_connections()?;

    let trigger_ids = workflow.trigger_node_ids();
    if trigger_ids.is_empty() {
        bail!(trelliscore::WorkflowError::NoTriggerNode);
    }

    let pruned = prune(&workflow, &trigger_ids);
    let order = topological_sort(&pruned.nodes, &pruned.connections)?;
    let parents = build_parents(&pruned.connections);

    let registry = standard_registry();
    for node in &order {
        registry.dispatch(node.node_type)?;
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {} ({} reachable)", workflow.nodes.len(), order.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();
    println!("🧭 Execution order:");
    for (i, node) in order.iter().enumerate() {
        match parents.get(&node.id) {
            Some(from) => println!("  {}. {} ({}) <- {}", i + 1, node.id, node.node_type, from.join(", ")),
            None => println!("  {}. {} ({})", i + 1, node.id, node.node_type),
        }
    }

    let skipped: Vec<_> = workflow
        .nodes
        .iter()
        .filter(|n| !order.iter().any(|o| o.id == n.id))
        .map(|n| n.id.as_str())
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("⚠️  Unreachable from any trigger: {}", skipped.join(", "));
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry();
    for node_type in registry.list_node_types() {
        if node_type.is_trigger() {
            println!("  • {} (trigger)", node_type);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("example", "local").with_name("Example HTTP Workflow");

    let trigger = workflow.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    let wait = workflow.add_node(
        NodeSpec::new("wait", NodeType::Delay).with_data(json!({ "delayMs": 500 })),
    );
    let fetch = workflow.add_node(NodeSpec::new("fetch", NodeType::HttpRequest).with_data(json!({
        "variableName": "zen",
        "endpoint": "https://api.github.com/zen",
        "method": "GET",
    })));

    workflow.connect(trigger, wait.clone());
    workflow.connect(wait, fetch);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  trellis run --file {} --input '{{\"source\": \"cli\"}}'",
        output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_max_attempts() {
        let cli = Cli::try_parse_from([
            "trellis",
            "run",
            "--file",
            "workflow.json",
            "--max-attempts",
            "7",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { max_attempts, .. } => assert_eq!(max_attempts, Some(7)),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn max_attempts_overrides_config_file() {
        let path = std::env::temp_dir().join(format!("trellis-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "event_buffer_size": 64, "retry": { "max_attempts": 5 } }"#).unwrap();

        let from_file = runtime_config(Some(&path), None).unwrap();
        let overridden = runtime_config(Some(&path), Some(1)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(from_file.retry.max_attempts, 5);
        assert_eq!(overridden.retry.max_attempts, 1);
        assert_eq!(overridden.event_buffer_size, 64);
    }

    #[test]
    fn defaults_apply_without_config_file() {
        let config = runtime_config(None, None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn input_must_be_an_object() {
        assert!(parse_input(Some("[1, 2]".into())).is_err());
        assert!(parse_input(None).unwrap().is_none());
        let input = parse_input(Some(r#"{ "email": "a@b.c" }"#.into())).unwrap().unwrap();
        assert_eq!(input["email"], "a@b.c");
    }
}
