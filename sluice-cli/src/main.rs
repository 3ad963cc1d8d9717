mod commands;
mod output;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use commands::{clean, compile, describe, init, run, validate};

#[derive(Parser)]
#[command(name = "sluice", version, about = "Compile and run templated data pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory or project.yaml (default: search upwards from the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project
    Init(init::InitArgs),
    /// Render a pipeline without running it
    Compile(compile::CompileArgs),
    /// Compile and execute a pipeline
    Run(run::RunArgs),
    /// Show the dependency graph of a pipeline
    Describe(describe::DescribeArgs),
    /// Validate a pipeline and the names passed to it
    Validate(validate::ValidateArgs),
    /// Remove compiled artifacts and downloaded results
    Clean(clean::CleanArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project = cli.project.as_deref();
    match cli.command {
        Commands::Init(args) => init::execute(args),
        Commands::Compile(args) => compile::execute(args, project).await,
        Commands::Run(args) => run::execute(args, project).await,
        Commands::Describe(args) => describe::execute(args, project),
        Commands::Validate(args) => validate::execute(args, project),
        Commands::Clean(args) => clean::execute(args, project).await,
    }
}
