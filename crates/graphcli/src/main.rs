use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use graphcore::{
    CompareOp, Fields, Graph, GraphDefinition, LogEntry, LoopSpec, NodeSpec, Phase, Predicate,
    RunEvent, RunStatus, Value,
};
use graphruntime::{GraphRuntime, RuntimeConfig, ToolRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphflow")]
#[command(about = "Graph execution engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial state as a JSON object
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the initial state from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available tools
    Tools,

    /// Create a new example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Template::Counter)]
        template: Template,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Template {
    /// Bounded counting loop
    Counter,
    /// Data-quality pipeline with a sample dataset
    DataQuality,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn standard_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    graphtools::register_all(&mut registry);
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            input_file,
            verbose,
        } => {
            init_tracing(verbose);

            let input = match input_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => input,
            };
            run_graph(file, input).await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Tools => {
            list_tools();
        }

        Commands::Init { output, template } => {
            create_example_graph(output, template)?;
        }
    }

    Ok(())
}

fn load_definition(file: &Path) -> Result<GraphDefinition> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))
}

fn parse_input(input: Option<String>) -> Result<Fields> {
    let Some(input) = input else {
        return Ok(Fields::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_graph(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());

    let definition = load_definition(&file)?;
    let initial_state = parse_input(input)?;

    println!("📋 Graph: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len() + definition.conditional_edges.len());
    println!("   Loops: {}", definition.loops.len());
    println!();

    let runtime = GraphRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::from_env());

    // Subscribe before starting so no event is missed
    let mut events = runtime.subscribe_all();

    let graph_id = runtime.create_graph(definition).await?;
    let run_id = runtime.run_async(graph_id, initial_state).await?;
    println!("▶️  Run {} started", run_id);

    loop {
        match events.recv().await {
            Ok(event) if event.run_id() != run_id => {}
            Ok(RunEvent::Log { entry, .. }) => print_entry(&entry),
            Ok(RunEvent::Finished { .. }) => break,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event listener lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }

    let run = runtime.get_run_state(run_id).await?;
    info!("Run {} finished with status {:?}", run_id, run.status);

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", run.id);
    println!("   Status: {:?}", run.status);
    println!("   Log entries: {}", run.state.log.len());
    println!();
    println!("📤 Final state:");
    println!("{}", serde_json::to_string_pretty(&run.state.fields)?);

    match (run.status, run.error) {
        (RunStatus::Completed, _) => {
            println!();
            println!("✨ Run completed successfully");
            Ok(())
        }
        (_, Some(failure)) => bail!("💥 Run failed ({}): {}", failure.kind, failure.message),
        (status, None) => bail!("💥 Run ended with status {:?}", status),
    }
}

fn print_entry(entry: &LogEntry) {
    let detail = &entry.detail;
    match entry.phase {
        Phase::Started => {
            println!("  ⚡ Starting node: {} ({})", entry.node_id, detail["tool"].as_str().unwrap_or("?"));
        }
        Phase::Completed => {
            println!("  ✅ Node {} completed in {}ms", entry.node_id, detail["duration_ms"]);
        }
        Phase::Failed => {
            println!("  ❌ Node {} failed: {}", entry.node_id, detail["error"].as_str().unwrap_or("?"));
        }
        Phase::LoopIteration => {
            println!(
                "  🔁 Loop {} iteration {}/{}",
                entry.node_id, detail["iteration"], detail["max_iterations"]
            );
        }
        Phase::LoopExit => {
            println!(
                "  ↩️  Loop {} exited after {} iterations ({})",
                entry.node_id,
                detail["iterations"],
                detail["reason"].as_str().unwrap_or("?")
            );
        }
    }
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let definition = load_definition(file)?;
    let graph = Graph::compile(definition)?;
    let definition = graph.definition();

    println!("✅ Graph is valid:");
    println!("   Name: {}", graph.name());
    println!("   Entry: {}", graph.entry());
    println!("   Nodes: {}", graph.node_count());
    println!(
        "   Edges: {} ({} conditional)",
        definition.edges.len() + definition.conditional_edges.len(),
        definition.conditional_edges.len()
    );
    println!("   Loops: {}", definition.loops.len());

    if graph.has_undeclared_cycle() {
        println!("⚠️  Edges form a cycle outside any loop; runs stop at the step limit");
    }

    let registry = standard_registry();
    for node in &definition.nodes {
        if !registry.contains(&node.tool) {
            println!("⚠️  Node {} uses tool '{}', which is not built in", node.id, node.tool);
        }
    }

    Ok(())
}

fn list_tools() {
    println!("📦 Available Tools:");
    println!();

    let registry = standard_registry();

    for name in registry.list_tools() {
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn counter_graph() -> GraphDefinition {
    let mut def = GraphDefinition::new("Example counter")
        .with_description("Increments a counter in a bounded loop, then logs the result");

    def.add_node(NodeSpec::new("start", "debug.log").with_param("message", "counting"));
    def.add_node(NodeSpec::new("increment", "state.increment").with_param("field", "count"));
    def.add_node(NodeSpec::new("report", "debug.log").with_param("message", "done"));

    def.add_loop(
        LoopSpec::new("start", "increment", Predicate::field("count", CompareOp::Lt, 3))
            .with_max_iterations(10)
            .with_exit("report"),
    );
    def.set_entry("start");
    def
}

fn create_example_graph(output: PathBuf, template: Template) -> Result<()> {
    let definition = match template {
        Template::Counter => counter_graph(),
        Template::DataQuality => graphtools::data_quality_graph(),
    };

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Run it with:");

    match template {
        Template::Counter => {
            println!("  graphflow run --file {} --input '{{\"count\": 0}}'", output.display());
        }
        Template::DataQuality => {
            let input = output.with_extension("input.json");
            let mut state = Fields::new();
            state.insert("dataset".to_string(), Value::Array(graphtools::sample_dataset()));
            std::fs::write(&input, serde_json::to_string_pretty(&state)?)?;

            println!("  graphflow run --file {} --input-file {}", output.display(), input.display());
        }
    }

    Ok(())
}
