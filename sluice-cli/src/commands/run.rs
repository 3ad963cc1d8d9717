use crate::commands::{open_project, parse_assignments};
use crate::{output, progress};

use std::path::Path;

use clap::Args;
use color_eyre::Result;

use sluice_engine::{progress_channel, ExecutorConfig, ModeKind, NodeStatus, Selection};

/// Compile and execute a pipeline against its connection
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline name from project.yaml
    pub pipeline: String,

    /// Mode to execute (run or save)
    #[arg(long, short, value_name = "MODE", default_value = "run")]
    pub mode: ModeKind,

    /// Start from this node and everything downstream of it ("." for all)
    #[arg(long, value_name = "NODE")]
    pub start: Option<String>,

    /// Restrict the run to these nodes
    #[arg(long, short, value_name = "NODE", num_args = 1..)]
    pub tables: Vec<String>,

    /// Set a render override (can be repeated, format: name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Update a pipeline argument (can be repeated, format: name=value)
    #[arg(long = "arg", value_name = "NAME=VALUE")]
    pub arguments: Vec<String>,

    /// Use this connection instead of the configured one
    #[arg(long, value_name = "CONNECTION")]
    pub connection: Option<String>,

    /// Run independent nodes of a layer concurrently
    #[arg(long)]
    pub layered: bool,

    /// Maximum concurrent nodes per layer (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 0, requires = "layered")]
    pub max_parallel: usize,
}

pub async fn execute(args: RunArgs, project_path: Option<&Path>) -> Result<()> {
    let project = open_project(project_path)?;
    let nodes = args.start.iter().chain(&args.tables).map(|n| Some(n.as_str()));
    for node in std::iter::once(None).chain(nodes) {
        if let Err(e) = project.validate(
            args.mode.as_str(),
            &args.pipeline,
            node,
            args.connection.as_deref(),
        ) {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    }

    let overrides = parse_assignments(&args.variables)?;
    let arguments = parse_assignments(&args.arguments)?;

    let mut selection = match &args.start {
        Some(start) => Selection::starting_at(start),
        None => Selection::all(),
    };
    if !args.tables.is_empty() {
        selection = selection.with_tables(args.tables.iter().cloned());
    }

    let config = if args.layered {
        ExecutorConfig::layered(args.max_parallel)
    } else {
        ExecutorConfig::default()
    };

    let (tx, rx) = progress_channel();
    let mut pipeline = project
        .pipeline_with_connection(&args.pipeline, args.connection.as_deref())?
        .with_config(config)
        .with_progress(tx);
    if !pipeline.has_connection() {
        output::error(&format!("pipeline '{}' has no connection", args.pipeline));
        std::process::exit(1);
    }
    pipeline.update_arguments(arguments);

    output::status("Running", &format!("{} [{}]", args.pipeline, args.mode));
    let mode = args.mode;
    let exec_handle =
        tokio::spawn(async move { pipeline.execute(mode, &selection, overrides).await });

    progress::render(rx).await;

    match exec_handle.await? {
        Ok(result) => {
            println!();
            output::success(&format!(
                "{} nodes executed, {} recovered, {} skipped in {:.2}s",
                result.count(NodeStatus::Executed),
                result.count(NodeStatus::Recovered),
                result.count(NodeStatus::Skipped),
                result.duration.as_secs_f64()
            ));
            Ok(())
        }
        Err(e) => {
            println!();
            output::failure(&format!("Run failed: {}", e));
            std::process::exit(1);
        }
    }
}
