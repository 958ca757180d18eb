use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, Command};
use pipeline::config::{Configuration, CONFIG_PATH};
use pipeline::graph::PipelineGraph;
use pipeline::nodes::register_builtin_nodes;
use pipeline::registry::NodeRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline=info,pipeline_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("pipeline_runner")
        .about("Builds a node pipeline from a JSON configuration and runs it once")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration document (default: the process-wide config/configuration.json)"),
        )
        .arg(
            Arg::new("list-kinds")
                .long("list-kinds")
                .action(clap::ArgAction::SetTrue)
                .help("Print every registered node kind with its parameter schema and exit"),
        )
        .get_matches();

    let mut registry = NodeRegistry::new();
    register_builtin_nodes(&mut registry);

    if matches.get_flag("list-kinds") {
        for kind in registry.kinds() {
            let schema = registry.parameter_schema(kind).unwrap_or_default();
            println!("{kind}: {}", serde_json::to_string_pretty(&schema)?);
        }
        return Ok(());
    }

    let configuration = match matches.get_one::<String>("config") {
        Some(path) => Arc::new(
            Configuration::from_path(path).with_context(|| format!("Failed to load {path}"))?,
        ),
        None => Configuration::global().with_context(|| format!("Failed to load {CONFIG_PATH}"))?,
    };

    let mut graph =
        PipelineGraph::build(&configuration, &registry).context("Failed to build pipeline graph")?;
    tracing::info!("Running {} generator node(s)", graph.generators().len());

    let run = graph.run_roots().context("Pipeline run failed");
    graph.dispose_graph().context("Pipeline disposal failed")?;
    run?;

    tracing::info!("Pipeline finished");
    Ok(())
}
