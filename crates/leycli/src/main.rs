use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use leycore::{
    EventData, EventKind, ExecutionEvent, ExecutionOptions, ExecutionResult, NodeSpec, Value,
    Workflow,
};
use leyruntime::{EngineConfig, ExecutionEngine, ExecutionPlan, ExecutorRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ley")]
#[command(about = "Ley workflow engine CLI", long_about = None)]
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

        /// Run variables as a JSON object
        #[arg(long)]
        vars: Option<String>,

        /// Per-node timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log node inputs and data flow
        #[arg(short, long)]
        debug: bool,

        /// Report a breakpoint after the batch containing this node
        #[arg(long = "breakpoint")]
        breakpoints: Vec<String>,

        /// Report a breakpoint after every batch
        #[arg(long)]
        step: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the execution plan of a workflow file
    Plan {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a workflow file
    Validate {
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

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_tracing(verbose);

    match cli.command {
        Commands::Run {
            file,
            vars,
            timeout,
            config,
            debug,
            breakpoints,
            step,
            ..
        } => {
            let mut options = ExecutionOptions::new().with_debug(debug).with_step_mode(step);
            options.timeout_ms = timeout;
            options.breakpoints = breakpoints;
            if let Some(vars) = vars {
                options.variables = parse_vars(&vars)?;
            }
            let config = match config {
                Some(path) => EngineConfig::from_path(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => EngineConfig::default(),
            };

            let result = run_workflow(&file, options, config).await?;
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Plan { file } => print_plan(&file)?,

        Commands::Validate { file } => validate_workflow(&file)?,

        Commands::Nodes => list_nodes(),

        Commands::Init { output } => create_example_workflow(&output)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load(file: &Path) -> Result<Workflow> {
    Workflow::from_path(file).with_context(|| format!("Failed to load workflow {}", file.display()))
}

fn parse_vars(raw: &str) -> Result<std::collections::HashMap<String, Value>> {
    match serde_json::from_str::<serde_json::Value>(raw).context("--vars is not valid JSON")? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => bail!("--vars must be a JSON object"),
    }
}

fn registry() -> ExecutorRegistry {
    leynodes::standard_registry()
}

async fn run_workflow(file: &Path, options: ExecutionOptions, config: EngineConfig) -> Result<ExecutionResult> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    tracing::debug!(
        max_concurrent_nodes = config.max_concurrent_nodes,
        default_node_timeout_ms = config.default_node_timeout_ms,
        "Engine configuration"
    );
    let engine = ExecutionEngine::new(Arc::new(registry()), config);
    engine.subscribe_all(print_event);

    let result = engine.run_workflow(&workflow, options).await;
    tracing::info!(
        execution_id = %result.context.execution_id,
        status = ?result.context.status,
        "Workflow run finished"
    );

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.context.execution_id);
    println!("   Status: {:?}", result.context.status);
    println!("   Time: {}ms", result.execution_time_ms);
    println!(
        "   Executed: {}/{} nodes ({} failed, {} skipped)",
        result.context.metadata.executed_nodes,
        result.context.metadata.total_nodes,
        result.context.metadata.failed_nodes,
        result.context.metadata.skipped_nodes
    );

    if !result.context.errors.is_empty() {
        println!();
        println!("❌ Errors:");
        for error in &result.context.errors {
            println!("   [{}] {:?}: {}", error.node_id, error.kind, error.message);
        }
    }

    if !result.final_outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (name, value) in &result.final_outputs {
            println!("   {}: {}", name, value.to_json_pretty());
        }
    }

    Ok(result)
}

fn print_event(event: &ExecutionEvent) {
    let node = event.node_id.as_deref().unwrap_or("?");
    match (event.kind, &event.data) {
        (EventKind::ExecutionStarted, Some(EventData::Plan { execution_order, .. })) => {
            println!("▶️  Execution started: {}", execution_order.join(" → "));
        }
        (EventKind::NodeStarted, Some(EventData::NodeStarted { node_type, .. })) => {
            println!("  ⚡ Starting node: {} ({})", node, node_type);
        }
        (EventKind::NodeCompleted, Some(EventData::NodeCompleted { duration_ms, .. })) => {
            println!("  ✅ Node {} completed in {}ms", node, duration_ms);
        }
        (EventKind::NodeFailed, Some(EventData::Failure { error })) => {
            println!("  ❌ Node {} failed: {}", node, error.message);
        }
        (EventKind::NodeSkipped, Some(EventData::Skipped { reason })) => {
            println!("  ⏭️  Node {} skipped ({:?})", node, reason);
        }
        (EventKind::BreakpointHit, Some(EventData::Breakpoint { node_ids, .. })) => {
            println!("  🔴 Breakpoint after: {}", node_ids.join(", "));
        }
        (EventKind::ExecutionCompleted, Some(EventData::Summary { execution_time_ms, .. })) => {
            println!("✨ Execution completed successfully in {}ms", execution_time_ms);
        }
        (EventKind::ExecutionFailed, Some(EventData::Summary { execution_time_ms, .. })) => {
            println!("💥 Execution failed after {}ms", execution_time_ms);
        }
        (EventKind::ExecutionFailed, Some(EventData::Failure { error })) => {
            println!("💥 Execution failed: {}", error.message);
        }
        (EventKind::ExecutionCancelled, _) => println!("🛑 Execution cancelled"),
        _ => {}
    }
}

fn print_plan(file: &Path) -> Result<()> {
    let workflow = load(file)?;
    let plan = ExecutionPlan::build(&workflow.nodes, &workflow.edges)?;
    tracing::debug!(groups = plan.parallel_groups.len(), "Planned workflow {}", workflow.name);

    println!("🗺️  Execution plan for: {}", workflow.name);
    println!("   Order: {}", plan.execution_order.join(" → "));
    println!("   Parallel groups:");
    for (level, group) in plan.parallel_groups.iter().enumerate() {
        println!("     {}: {}", level, group.join(", "));
    }
    println!("   Entry points: {}", plan.entry_points.join(", "));
    println!("   Exit points: {}", plan.exit_points.join(", "));
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let workflow = load(file)?;

    let plan = ExecutionPlan::build(&workflow.nodes, &workflow.edges)?;
    if !plan.validate(&workflow.nodes) {
        bail!("Invalid execution plan generated");
    }

    let registry = registry();
    tracing::debug!("Checking {} node(s) against {} executor(s)", workflow.nodes.len(), registry.list_node_types().len());
    let unknown: Vec<&NodeSpec> = workflow
        .nodes
        .iter()
        .filter(|n| !registry.contains(&n.node_type))
        .collect();
    if !unknown.is_empty() {
        for node in &unknown {
            println!("   ❌ {}: no executor for type '{}'", node.id, node.node_type);
        }
        bail!("{} node(s) have no executor", unknown.len());
    }

    let mut problems = 0;
    for node in &workflow.nodes {
        if let Some(executor) = registry.get(&node.node_type) {
            if let Err(e) = executor.validate(node) {
                println!("   ❌ {}: {}", node.id, e);
                problems += 1;
            }
        }
    }
    if problems > 0 {
        bail!("{} node(s) failed validation", problems);
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for port in &metadata.inputs {
                let marker = if port.required { "*" } else { "" };
                println!("      in  {}{}: {}", port.name, marker, port.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example Transform Workflow");
    workflow.description = Some("Doubles a list of numbers and keeps the large ones".to_string());

    let numbers = workflow.add_node(
        NodeSpec::new("numbers", "input")
            .with_label("numbers")
            .with_property("dataType", "array")
            .with_property(
                "defaultValue",
                Value::Array(vec![Value::from(1i64), Value::from(5i64), Value::from(10i64)]),
            ),
    );
    let double = workflow.add_node(
        NodeSpec::new("double", "transform")
            .with_label("Double")
            .with_property("transformType", "map")
            .with_property("expression", "item * 2"),
    );
    let large = workflow.add_node(
        NodeSpec::new("large", "transform")
            .with_label("Keep large")
            .with_property("transformType", "filter")
            .with_property("expression", "item > (variables.threshold ?? 5)"),
    );
    let result = workflow.add_node(NodeSpec::new("result", "output").with_label("result"));

    workflow.link(numbers, double.clone());
    workflow.link(double, large.clone());
    workflow.link(large, result);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  ley run --file {} --vars '{{\"threshold\": 8}}'", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ley-{}-{}.json", std::process::id(), name))
    }

    #[tokio::test]
    async fn example_workflow_plans_validates_and_runs() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let path = scratch("example");
        create_example_workflow(&path).unwrap();

        print_plan(&path).unwrap();
        validate_workflow(&path).unwrap();

        let options = ExecutionOptions {
            variables: parse_vars(r#"{"threshold": 8}"#).unwrap(),
            ..ExecutionOptions::new()
        };
        let result = run_workflow(&path, options, EngineConfig::default()).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert!(result.success);
        assert_eq!(result.context.metadata.total_nodes, 4);
        assert!(result.final_outputs.contains_key("result"));
    }

    #[test]
    fn vars_must_be_an_object() {
        assert!(parse_vars("[1, 2]").is_err());
        assert!(parse_vars("not json").is_err());
        assert_eq!(parse_vars(r#"{"a": 1}"#).unwrap()["a"], Value::from(1i64));
    }
}
