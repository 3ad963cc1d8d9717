use crate::commands::{open_project, parse_assignments};
use crate::{output, progress};

use std::path::Path;

use clap::Args;
use color_eyre::Result;

use sluice_engine::{progress_channel, ModeKind};

/// Render a pipeline's statements into its compile path
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Pipeline name from project.yaml
    pub pipeline: String,

    /// Mode to compile (run or save)
    #[arg(long, short, value_name = "MODE", default_value = "run")]
    pub mode: ModeKind,

    /// Set a render override (can be repeated, format: name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Update a pipeline argument (can be repeated, format: name=value)
    #[arg(long = "arg", value_name = "NAME=VALUE")]
    pub arguments: Vec<String>,

    /// Use this connection instead of the configured one
    #[arg(long, value_name = "CONNECTION")]
    pub connection: Option<String>,

    /// Print the dependency graph after compiling
    #[arg(long)]
    pub show_dag: bool,
}

pub async fn execute(args: CompileArgs, project_path: Option<&Path>) -> Result<()> {
    let project = open_project(project_path)?;
    if let Err(e) = project.validate(
        args.mode.as_str(),
        &args.pipeline,
        None,
        args.connection.as_deref(),
    ) {
        output::error(&e.to_string());
        std::process::exit(1);
    }

    let overrides = parse_assignments(&args.variables)?;
    let arguments = parse_assignments(&args.arguments)?;

    let (tx, rx) = progress_channel();
    let mut pipeline = project
        .pipeline_with_connection(&args.pipeline, args.connection.as_deref())?
        .with_progress(tx);
    pipeline.update_arguments(arguments);
    let compile_path = pipeline.compile_path().to_path_buf();

    output::status("Compiling", &format!("{} [{}]", args.pipeline, args.mode));
    let mode = args.mode;
    let exec_handle = tokio::spawn(async move {
        let result = pipeline.compile(mode, overrides).await;
        (result, pipeline.describe(mode))
    });

    progress::render(rx).await;

    let (result, description) = exec_handle.await?;
    match result {
        Ok(result) => {
            println!();
            output::success(&format!(
                "{} nodes compiled into {} in {:.2}s",
                result.nodes.len(),
                compile_path.display(),
                result.duration.as_secs_f64()
            ));
            if args.show_dag {
                println!();
                println!("{}", description.to_mermaid());
            }
            Ok(())
        }
        Err(e) => {
            println!();
            output::failure(&format!("Compile failed: {}", e));
            std::process::exit(1);
        }
    }
}
