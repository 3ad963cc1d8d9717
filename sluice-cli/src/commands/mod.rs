// CLI subcommands and the helpers they share

pub mod clean;
pub mod compile;
pub mod describe;
pub mod init;
pub mod run;
pub mod validate;

use std::path::Path;

use color_eyre::eyre::{bail, Context};
use color_eyre::Result;

use sluice_engine::utils::PROJECT_FILE;
use sluice_engine::{Project, RunContext, Value, Variables};

/// Load the project at `path`, or the one enclosing the current directory
pub fn open_project(path: Option<&Path>) -> Result<Project> {
    let ctx = match path {
        Some(path) if path.is_file() => {
            RunContext::new(path.parent().unwrap_or_else(|| Path::new(".")))
        }
        Some(path) => RunContext::discover(path)?,
        None => RunContext::discover(&std::env::current_dir()?)?,
    };

    let project = Project::load(ctx)
        .with_context(|| format!("failed to load {}", PROJECT_FILE))?;
    tracing::debug!(project = project.name(), root = %project.context().root().display(), "opened project");
    Ok(project)
}

/// Parse repeated `NAME=VALUE` flags
pub fn parse_assignments(assignments: &[String]) -> Result<Variables> {
    let mut variables = Variables::new();
    for assignment in assignments {
        match assignment.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                variables.insert(name.to_string(), Value::from(value));
            }
            _ => bail!("Invalid variable format '{}'. Expected name=value", assignment),
        }
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let vars = parse_assignments(&["day=2024-01-01".to_string(), "filter=a=b".to_string()]).unwrap();
        assert_eq!(vars["day"], Value::from("2024-01-01"));
        assert_eq!(vars["filter"], Value::from("a=b"));

        assert!(parse_assignments(&["novalue".to_string()]).is_err());
        assert!(parse_assignments(&["=x".to_string()]).is_err());
    }
}
