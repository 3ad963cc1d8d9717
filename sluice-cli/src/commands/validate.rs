use crate::commands::open_project;
use crate::output;

use std::path::Path;

use clap::Args;
use color_eyre::Result;

use sluice_engine::{EngineError, ModeKind};

/// Validate a pipeline and the names passed to it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pipeline name from project.yaml
    pub pipeline: String,

    /// Mode to check (run, save or clean)
    #[arg(long, short, value_name = "MODE", default_value = "run")]
    pub mode: String,

    /// Node that must exist ("." or "all" for every node)
    #[arg(long, value_name = "NODE")]
    pub node: Option<String>,

    /// Connection that must be configured
    #[arg(long, value_name = "CONNECTION")]
    pub connection: Option<String>,
}

pub fn execute(args: ValidateArgs, project_path: Option<&Path>) -> Result<()> {
    let project = open_project(project_path)?;
    output::status(
        "Validating",
        &format!("{} in project '{}'", args.pipeline, project.name()),
    );

    // Step 1: Names
    if let Err(e) = project.validate(
        &args.mode,
        &args.pipeline,
        args.node.as_deref(),
        args.connection.as_deref(),
    ) {
        report(&e);
        std::process::exit(1);
    }
    output::check("Names resolved");

    if args.mode == "clean" {
        println!();
        output::success("Nothing else to check for clean");
        return Ok(());
    }

    // Step 2: Pipeline file and graph
    let pipeline = match project.pipeline_with_connection(&args.pipeline, args.connection.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    };
    let dag = pipeline.dag();
    output::check(&format!("Pipeline file valid: {} nodes", dag.len()));

    for mode in dag.modes_present() {
        match dag.layers(mode) {
            Ok(layers) => output::check(&format!(
                "{}: {} nodes in {} layers",
                mode,
                layers.iter().map(Vec::len).sum::<usize>(),
                layers.len()
            )),
            Err(e) => {
                output::error(&format!("{}: {}", mode, e));
                std::process::exit(1);
            }
        }
    }

    // Step 3: Connection
    let mode: ModeKind = args.mode.parse().map_err(color_eyre::eyre::Report::msg)?;
    if !pipeline.has_connection() {
        output::warning(&format!(
            "No connection; '{}' can compile only nodes that publish no outputs",
            mode
        ));
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}

fn report(error: &EngineError) {
    match error {
        EngineError::Parse(e) => {
            output::error(&format!("Parse error: {}", e.message));
            if e.line > 0 {
                output::dim(&format!("  at line {}, column {}", e.line, e.column));
            }
            if !e.context.is_empty() {
                output::dim(&e.context);
            }
            if let Some(suggestion) = &e.suggestion {
                output::info(&format!("  Suggestion: {}", suggestion));
            }
        }
        other => output::error(&other.to_string()),
    }
}
