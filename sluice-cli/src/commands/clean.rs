use crate::commands::open_project;
use crate::output;

use std::path::Path;

use clap::Args;
use color_eyre::Result;

use sluice_engine::CleanFacet;

/// Remove compiled artifacts and downloaded results
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Pipeline name, or "all" / "." for every pipeline
    #[arg(default_value = "all")]
    pub pipeline: String,

    /// What to remove (compiled, data); defaults to both
    #[arg(long, value_name = "FACET", num_args = 1..)]
    pub facet: Vec<CleanFacet>,
}

pub async fn execute(args: CleanArgs, project_path: Option<&Path>) -> Result<()> {
    let project = open_project(project_path)?;
    if let Err(e) = project.validate("clean", &args.pipeline, None, None) {
        output::error(&e.to_string());
        std::process::exit(1);
    }

    let facets = if args.facet.is_empty() {
        CleanFacet::ALL.to_vec()
    } else {
        args.facet
    };
    let labels: Vec<&str> = facets.iter().map(CleanFacet::as_str).collect();

    output::status("Cleaning", &format!("{} ({})", args.pipeline, labels.join(", ")));
    for name in project.clean(&args.pipeline, &facets).await? {
        output::check(&name);
    }
    output::success("Clean complete");

    Ok(())
}
