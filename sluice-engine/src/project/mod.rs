// Project Module
// Loads project.yaml, its connections and the pipelines it registers

pub mod config;
pub mod context;
pub mod pipeline;

pub use config::{PipelineEntry, ProjectConfig};
pub use context::RunContext;
pub use pipeline::{CleanFacet, Pipeline};

use crate::connector::{CommandExecutor, Executor};
use crate::dag::ModeKind;
use crate::error::{EngineError, EngineResult};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const SEED_PIPELINE: &str = "pipelines/example.yaml";

const SEED_PIPELINE_CONTENT: &str = r#"arguments:
  start_date: "2024-01-01"

etl:
  days:
    run:
      query: "select distinct day from raw.events where day >= '{{ start_date }}'"
      outputs: [day]
      store_results: true

  events:
    run:
      query: "select * from raw.events where day in ({{ day | quote }})"
      depends_on: [days]
      method: replace
    save:
      query: "select * from {{ this }}"
      format: csv
"#;

/// Selector matching every pipeline or node
pub fn selects_everything(name: &str) -> bool {
    matches!(name, "." | "all")
}

/// A loaded project: configuration plus one executor per connection
#[derive(Debug)]
pub struct Project {
    context: RunContext,
    config: ProjectConfig,
    connections: BTreeMap<String, Arc<CommandExecutor>>,
}

impl Project {
    /// Load the project rooted at `ctx`
    pub fn load(ctx: RunContext) -> EngineResult<Self> {
        let config = ProjectConfig::from_file(&ctx.project_file())?;

        let connections = config
            .connections
            .iter()
            .map(|(name, settings)| {
                let mut settings = settings.clone();
                settings.working_dir = Some(match &settings.working_dir {
                    Some(dir) => ctx.resolve(dir),
                    None => ctx.root().to_path_buf(),
                });
                (name.clone(), Arc::new(CommandExecutor::new(settings)))
            })
            .collect();

        tracing::debug!(
            project = %config.name,
            root = %ctx.root().display(),
            pipelines = config.pipelines.len(),
            "loaded project"
        );

        Ok(Self {
            context: ctx,
            config,
            connections,
        })
    }

    /// Create a new project directory seeded with one example pipeline
    pub fn init(dir: &Path, name: &str) -> EngineResult<RunContext> {
        if dir.exists() {
            return Err(EngineError::ProjectExists(dir.to_path_buf()));
        }

        let ctx = RunContext::new(dir);
        fs::create_dir_all(ctx.resolve("pipelines"))?;
        fs::write(
            ctx.project_file(),
            format!(
                "project:\n  name: {}\n  connections: {{}}\n  pipelines:\n    - name: example\n      pipeline: {}\n",
                name, SEED_PIPELINE
            ),
        )?;
        fs::write(ctx.resolve(SEED_PIPELINE), SEED_PIPELINE_CONTENT)?;

        tracing::info!(project = name, root = %dir.display(), "initialized project");
        Ok(ctx)
    }

    /// Find the project enclosing `start` and load it
    pub fn discover(start: &Path) -> EngineResult<Self> {
        Self::load(RunContext::discover(start)?)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Registered pipeline names, in file order
    pub fn pipeline_names(&self) -> Vec<&str> {
        self.config.pipelines.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn connection(&self, name: &str) -> Option<Arc<CommandExecutor>> {
        self.connections.get(name).cloned()
    }

    /// Load a registered pipeline wired to its connection
    pub fn pipeline(&self, name: &str) -> EngineResult<Pipeline> {
        self.pipeline_with_connection(name, None)
    }

    /// Load a pipeline, replacing its configured connection with `connection`
    pub fn pipeline_with_connection(
        &self,
        name: &str,
        connection: Option<&str>,
    ) -> EngineResult<Pipeline> {
        let entry = self
            .config
            .pipeline(name)
            .ok_or_else(|| EngineError::UnknownPipeline(name.to_string()))?;

        let executor = match connection.or(entry.connection.as_deref()) {
            Some(conn) => {
                let executor = self
                    .connection(conn)
                    .ok_or_else(|| EngineError::UnknownConnection(conn.to_string()))?;
                Some(executor as Arc<dyn Executor>)
            }
            None => None,
        };

        Pipeline::load(entry, &self.context, executor)
    }

    /// Check names given on the command line before anything runs.
    ///
    /// `mode` is `run`, `save` or `clean`. For `clean` the pipeline may be
    /// `.`/`all`; otherwise it must be registered, `node` may be `.`/`all` or
    /// a node of the pipeline, and `connection` must be configured.
    pub fn validate(
        &self,
        mode: &str,
        pipeline: &str,
        node: Option<&str>,
        connection: Option<&str>,
    ) -> EngineResult<()> {
        if mode == "clean" {
            if selects_everything(pipeline) || self.config.pipeline(pipeline).is_some() {
                return Ok(());
            }
            return Err(EngineError::UnknownPipeline(pipeline.to_string()));
        }

        mode.parse::<ModeKind>()
            .map_err(|_| EngineError::InvalidMode(mode.to_string()))?;

        if let Some(conn) = connection {
            if !self.connections.contains_key(conn) {
                return Err(EngineError::UnknownConnection(conn.to_string()));
            }
        }

        let loaded = self.pipeline_with_connection(pipeline, connection)?;
        match node {
            Some(node) if !selects_everything(node) && !loaded.dag().contains(node) => {
                Err(EngineError::UnknownNode {
                    pipeline: pipeline.to_string(),
                    node: node.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Clean one pipeline, or every pipeline for `.`/`all`. Returns the names
    /// cleaned.
    pub async fn clean(&self, target: &str, facets: &[CleanFacet]) -> EngineResult<Vec<String>> {
        let names: Vec<&str> = if selects_everything(target) {
            self.pipeline_names()
        } else {
            vec![target]
        };

        let mut cleaned = Vec::with_capacity(names.len());
        for name in names {
            let pipeline = self.pipeline(name)?;
            pipeline.clean_facets(facets).await?;
            cleaned.push(name.to_string());
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PROJECT_FILE;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
project:
  name: warehouse
  connections:
    local:
      program: duckdb
      args: ["warehouse.db", "-json"]
  pipelines:
    - name: sales
      pipeline: pipelines/sales.yaml
      connection: local
    - name: hr
      pipeline: pipelines/hr.yaml
      compile_path: build/hr
"#;

    const PIPELINE: &str = r#"
etl:
  orders:
    run:
      query: "select 1"
"#;

    fn project() -> (TempDir, Project) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(PROJECT_FILE), PROJECT).unwrap();
        fs::create_dir(temp.path().join("pipelines")).unwrap();
        fs::write(temp.path().join("pipelines/sales.yaml"), PIPELINE).unwrap();
        fs::write(temp.path().join("pipelines/hr.yaml"), PIPELINE).unwrap();
        let project = Project::load(RunContext::new(temp.path())).unwrap();
        (temp, project)
    }

    #[test]
    fn test_load_project() {
        let (temp, project) = project();
        assert_eq!(project.name(), "warehouse");
        assert_eq!(project.pipeline_names(), vec!["sales", "hr"]);

        let local = project.connection("local").unwrap();
        assert_eq!(local.config().working_dir.as_deref(), Some(temp.path()));

        let sales = project.pipeline("sales").unwrap();
        assert!(sales.has_connection());
        assert_eq!(sales.compile_path(), temp.path().join("compiled"));

        let hr = project.pipeline("hr").unwrap();
        assert!(!hr.has_connection());
        assert_eq!(hr.compile_path(), temp.path().join("build/hr"));
    }

    #[test]
    fn test_validate_names() {
        let (_temp, project) = project();

        assert!(project.validate("run", "sales", Some("orders"), Some("local")).is_ok());
        assert!(project.validate("save", "sales", Some("all"), None).is_ok());
        assert!(project.validate("clean", ".", None, None).is_ok());
        assert!(project.validate("clean", "hr", None, None).is_ok());

        assert!(matches!(
            project.validate("deploy", "sales", None, None),
            Err(EngineError::InvalidMode(_))
        ));
        assert!(matches!(
            project.validate("run", "finance", None, None),
            Err(EngineError::UnknownPipeline(_))
        ));
        assert!(matches!(
            project.validate("clean", "finance", None, None),
            Err(EngineError::UnknownPipeline(_))
        ));
        assert!(matches!(
            project.validate("run", "sales", Some("customers"), None),
            Err(EngineError::UnknownNode { .. })
        ));
        assert!(matches!(
            project.validate("run", "sales", None, Some("prod")),
            Err(EngineError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_all_pipelines() {
        let (temp, project) = project();
        fs::create_dir_all(temp.path().join("compiled/run")).unwrap();
        fs::create_dir_all(temp.path().join("build/hr/run")).unwrap();
        fs::create_dir_all(temp.path().join("download")).unwrap();

        let cleaned = project.clean("all", &[CleanFacet::Compiled]).await.unwrap();
        assert_eq!(cleaned, vec!["sales", "hr"]);
        assert!(!temp.path().join("compiled").exists());
        assert!(!temp.path().join("build/hr").exists());
        assert!(temp.path().join("download").exists());
    }

    #[test]
    fn test_init_seeds_loadable_project() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("warehouse");

        let ctx = Project::init(&dir, "warehouse").unwrap();
        let project = Project::load(ctx).unwrap();
        assert_eq!(project.pipeline_names(), vec!["example"]);

        let example = project.pipeline("example").unwrap();
        let description = example.describe(ModeKind::Run);
        assert_eq!(description.roots(), vec!["days"]);

        assert!(matches!(
            Project::init(&dir, "warehouse"),
            Err(EngineError::ProjectExists(_))
        ));
    }

    #[test]
    fn test_discover_from_nested_directory() {
        let (temp, _) = project();
        let project = Project::discover(&temp.path().join("pipelines")).unwrap();
        assert_eq!(project.name(), "warehouse");
    }
}
