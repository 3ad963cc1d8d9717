use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use sluice_engine::Project;

/// Create a new project with an example pipeline
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project name; also the directory created
    pub name: String,

    /// Parent directory (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

pub fn execute(args: InitArgs) -> Result<()> {
    let parent = match args.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let target = parent.join(&args.name);

    match Project::init(&target, &args.name) {
        Ok(ctx) => {
            output::success(&format!("Initialized project '{}'", args.name));
            output::info(&format!("edit {} to add connections", ctx.project_file().display()));
            Ok(())
        }
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    }
}
