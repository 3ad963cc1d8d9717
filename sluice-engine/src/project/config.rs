// Project Configuration
// Serde models and loading for project.yaml

use crate::connector::CommandConfig;
use crate::parser::{ParseError, ParseResult};

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Root of `project.yaml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    project: ProjectConfig,
}

/// The `project` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,

    /// Connection name -> client program settings
    #[serde(default)]
    pub connections: BTreeMap<String, CommandConfig>,

    #[serde(default)]
    pub pipelines: Vec<PipelineEntry>,
}

/// One pipeline registered with the project
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineEntry {
    pub name: String,

    /// Pipeline file, relative to the project root
    pub pipeline: PathBuf,

    /// Where compiled artifacts are written
    #[serde(default = "default_compile_path")]
    pub compile_path: PathBuf,

    /// Where extracted results are written
    #[serde(default = "default_download_path")]
    pub download: PathBuf,

    /// Connection used to execute statements
    #[serde(default)]
    pub connection: Option<String>,

    /// Recover from render failures instead of aborting
    #[serde(default)]
    pub soft_compile: bool,
}

fn default_compile_path() -> PathBuf {
    PathBuf::from("compiled")
}

fn default_download_path() -> PathBuf {
    PathBuf::from("download")
}

impl ProjectConfig {
    /// Parse and validate `project.yaml` content
    pub fn parse(content: &str) -> ParseResult<Self> {
        let file: ProjectFile =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;
        let config = file.project;

        let errors = config.validate();
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ParseError::validation(message));
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ParseResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParseError::io(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineEntry> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Vec<ParseError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (i, entry) in self.pipelines.iter().enumerate() {
            if entry.name.is_empty() {
                errors.push(ParseError::validation(format!(
                    "project.pipelines[{}]: 'name' must not be empty",
                    i
                )));
            } else if matches!(entry.name.as_str(), "." | "all") {
                errors.push(ParseError::validation(format!(
                    "project.pipelines[{}]: '{}' is reserved for selecting every pipeline",
                    i, entry.name
                )));
            } else if !seen.insert(entry.name.as_str()) {
                errors.push(ParseError::validation(format!(
                    "project.pipelines[{}]: duplicate pipeline name '{}'",
                    i, entry.name
                )));
            }

            if let Some(connection) = &entry.connection {
                if !self.connections.contains_key(connection) {
                    errors.push(ParseError::validation(format!(
                        "project.pipelines[{}]: unknown connection '{}'",
                        i, connection
                    )));
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ResultEncoding;

    #[test]
    fn test_parse_project() {
        let yaml = r#"
project:
  name: warehouse
  connections:
    local:
      program: duckdb
      args: ["warehouse.db", "-json"]
      timeout: 30
  pipelines:
    - name: sales
      pipeline: pipelines/sales.yaml
      connection: local
      soft_compile: true
    - name: hr
      pipeline: pipelines/hr.yaml
      download: exports/hr
"#;
        let config = ProjectConfig::parse(yaml).unwrap();
        assert_eq!(config.name, "warehouse");

        let local = &config.connections["local"];
        assert_eq!(local.program, "duckdb");
        assert_eq!(local.timeout, Some(30));
        assert_eq!(local.output, ResultEncoding::Json);

        let sales = config.pipeline("sales").unwrap();
        assert!(sales.soft_compile);
        assert_eq!(sales.compile_path, PathBuf::from("compiled"));

        let hr = config.pipeline("hr").unwrap();
        assert_eq!(hr.download, PathBuf::from("exports/hr"));
        assert!(hr.connection.is_none());
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let yaml = r#"
project:
  name: warehouse
  pipelines:
    - name: sales
      pipeline: sales.yaml
      connection: prod
"#;
        let err = ProjectConfig::parse(yaml).unwrap_err();
        assert!(err.message.contains("unknown connection 'prod'"));
    }

    #[test]
    fn test_duplicate_and_reserved_names() {
        let yaml = r#"
project:
  name: warehouse
  pipelines:
    - {name: sales, pipeline: a.yaml}
    - {name: sales, pipeline: b.yaml}
    - {name: all, pipeline: c.yaml}
"#;
        let err = ProjectConfig::parse(yaml).unwrap_err();
        assert!(err.message.contains("duplicate pipeline name 'sales'"));
        assert!(err.message.contains("'all' is reserved"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "project:\n  name: x\n  pipelnes: []\n";
        assert!(ProjectConfig::parse(yaml).is_err());
    }
}
