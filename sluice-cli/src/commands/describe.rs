use crate::commands::open_project;
use crate::output;

use std::path::Path;

use clap::Args;
use color_eyre::Result;

use sluice_engine::ModeKind;

/// Show the dependency graph of a pipeline
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Pipeline name from project.yaml
    pub pipeline: String,

    /// Mode whose dependencies are shown (run or save)
    #[arg(long, short, value_name = "MODE", default_value = "run")]
    pub mode: ModeKind,

    /// Print a Mermaid state diagram instead of a list
    #[arg(long)]
    pub mermaid: bool,
}

pub fn execute(args: DescribeArgs, project_path: Option<&Path>) -> Result<()> {
    let project = open_project(project_path)?;
    if let Err(e) = project.validate(args.mode.as_str(), &args.pipeline, None, None) {
        output::error(&e.to_string());
        std::process::exit(1);
    }

    let pipeline = project.pipeline(&args.pipeline)?;
    let description = pipeline.describe(args.mode);

    if args.mermaid {
        println!("{}", description.to_mermaid());
        return Ok(());
    }

    output::header(&format!(
        "Pipeline '{}' [{}] ({} nodes)",
        args.pipeline,
        args.mode,
        description.entries.len()
    ));
    for entry in &description.entries {
        if entry.depends_on.is_empty() {
            println!("    {}", entry.name);
        } else {
            println!("    {} <- {}", entry.name, entry.depends_on.join(", "));
        }
    }
    println!();
    output::info(&format!("roots: {}", description.roots().join(", ")));
    output::info(&format!("leaves: {}", description.leaves().join(", ")));

    Ok(())
}
