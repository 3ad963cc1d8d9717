// Pipeline
// A loaded pipeline file together with its paths, options and connection

use crate::connector::{Executor, FileSink, FsScriptResolver, RecordingExecutor, ScriptResolver, Sink};
use crate::dag::{Dag, DagDescription, ModeKind, Selection};
use crate::error::EngineResult;
use crate::execution::{CompileOptions, DagExecutor, ExecutionResult, ExecutorConfig, ProgressSender};
use crate::parser::models::{PipelineDefinition, Value, Variables};
use crate::parser::PipelineParser;
use crate::project::config::PipelineEntry;
use crate::project::context::RunContext;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Generated state that `clean` can remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanFacet {
    /// Rendered artifacts under the compile path
    Compiled,
    /// Extracted results under the download path
    Data,
}

impl CleanFacet {
    pub const ALL: [CleanFacet; 2] = [CleanFacet::Compiled, CleanFacet::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanFacet::Compiled => "compiled",
            CleanFacet::Data => "data",
        }
    }
}

impl fmt::Display for CleanFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanFacet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compiled" => Ok(CleanFacet::Compiled),
            "data" => Ok(CleanFacet::Data),
            _ => Err(format!("Unknown facet '{}'. Valid facets: compiled, data", s)),
        }
    }
}

/// A pipeline ready to compile or execute
pub struct Pipeline {
    name: String,
    dag: Dag,
    arguments: Variables,
    compile_path: PathBuf,
    download_path: PathBuf,
    compile_options: CompileOptions,
    scripts: Arc<dyn ScriptResolver>,
    executor: Option<Arc<dyn Executor>>,
    sink: Arc<dyn Sink>,
    config: ExecutorConfig,
    progress: Option<ProgressSender>,
}

impl Pipeline {
    /// Build from a parsed definition; paths default to `compiled/` and
    /// `download/` under the working directory
    pub fn from_definition(
        name: impl Into<String>,
        definition: &PipelineDefinition,
    ) -> EngineResult<Self> {
        let dag = Dag::from_definition(definition)?;
        let arguments = definition
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_yaml(v)))
            .collect();

        Ok(Self {
            name: name.into(),
            dag,
            arguments,
            compile_path: PathBuf::from("compiled"),
            download_path: PathBuf::from("download"),
            compile_options: CompileOptions::strict(),
            scripts: Arc::new(FsScriptResolver::new(".")),
            executor: None,
            sink: Arc::new(FileSink::new()),
            config: ExecutorConfig::default(),
            progress: None,
        })
    }

    /// Load a project pipeline entry; relative paths resolve against the
    /// project root
    pub fn load(
        entry: &PipelineEntry,
        ctx: &RunContext,
        executor: Option<Arc<dyn Executor>>,
    ) -> EngineResult<Self> {
        let file = ctx.resolve(&entry.pipeline);
        tracing::debug!(pipeline = %entry.name, file = %file.display(), "loading pipeline");
        let definition = PipelineParser::parse_file(&file)?;

        let options = if entry.soft_compile {
            CompileOptions::soft()
        } else {
            CompileOptions::strict()
        };

        let mut pipeline = Self::from_definition(&entry.name, &definition)?
            .with_paths(ctx.resolve(&entry.compile_path), ctx.resolve(&entry.download))
            .with_compile_options(options)
            .with_scripts(Arc::new(FsScriptResolver::new(ctx.root())));
        pipeline.executor = executor;
        Ok(pipeline)
    }

    pub fn with_paths(mut self, compile_path: impl Into<PathBuf>, download_path: impl Into<PathBuf>) -> Self {
        self.compile_path = compile_path.into();
        self.download_path = download_path.into();
        self
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = options;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptResolver>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn arguments(&self) -> &Variables {
        &self.arguments
    }

    pub fn compile_path(&self) -> &Path {
        &self.compile_path
    }

    pub fn download_path(&self) -> &Path {
        &self.download_path
    }

    pub fn has_connection(&self) -> bool {
        self.executor.is_some()
    }

    /// Merge `arguments` into the pipeline arguments and every mode's defaults
    pub fn update_arguments(&mut self, arguments: Variables) {
        for node in self.dag.nodes_mut() {
            for mode in node.modes_mut() {
                mode.defaults
                    .extend(arguments.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        self.arguments.extend(arguments);
    }

    /// Render every node of `mode` and write the artifacts under the compile
    /// path. Without a connection this only succeeds when no node of the mode
    /// publishes outputs.
    pub async fn compile(&mut self, mode: ModeKind, overrides: Variables) -> EngineResult<ExecutionResult> {
        let runner = self.runner();
        Ok(runner.compile(&mut self.dag, mode, overrides).await?)
    }

    /// Compile and run the selected nodes of `mode`
    pub async fn execute(
        &mut self,
        mode: ModeKind,
        selection: &Selection,
        overrides: Variables,
    ) -> EngineResult<ExecutionResult> {
        let runner = self.runner();
        Ok(runner.execute(&mut self.dag, mode, selection, overrides).await?)
    }

    pub fn describe(&self, mode: ModeKind) -> DagDescription {
        self.dag.describe(mode)
    }

    /// Remove compiled artifacts and downloaded results
    pub async fn clean(&self) -> EngineResult<()> {
        self.clean_facets(&CleanFacet::ALL).await
    }

    pub async fn clean_facets(&self, facets: &[CleanFacet]) -> EngineResult<()> {
        for facet in facets {
            let dir = match facet {
                CleanFacet::Compiled => &self.compile_path,
                CleanFacet::Data => &self.download_path,
            };
            remove_dir(dir).await?;
            tracing::info!(pipeline = %self.name, %facet, path = %dir.display(), "cleaned");
        }
        Ok(())
    }

    fn runner(&self) -> DagExecutor {
        // Offline compiles use an executor that refuses the health check, so
        // they fail only when a node needs results.
        let executor = self
            .executor
            .clone()
            .unwrap_or_else(|| Arc::new(RecordingExecutor::new().unhealthy()));

        let mut runner = DagExecutor::new(executor)
            .with_name(&self.name)
            .with_config(self.config.clone())
            .with_compile_options(self.compile_options.clone().with_compile_path(&self.compile_path))
            .with_scripts(self.scripts.clone())
            .with_sink(self.sink.clone(), &self.download_path);
        if let Some(tx) = &self.progress {
            runner = runner.with_progress(tx.clone());
        }
        runner
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("nodes", &self.dag.len())
            .field("compile_path", &self.compile_path)
            .field("download_path", &self.download_path)
            .field("connected", &self.executor.is_some())
            .finish()
    }
}

async fn remove_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Table;
    use crate::error::EngineError;
    use crate::execution::{ExecutionError, NodeStatus};
    use tempfile::TempDir;

    const PIPELINE: &str = r#"
arguments:
  day: "2024-01-01"
etl:
  days:
    run:
      query: "select d from calendar where d >= '{{ day }}'"
      outputs: [d]
      store_results: true
  orders:
    run:
      query: "select * from raw.orders where day in ({{ d | quote }})"
      depends_on: [days]
      method: replace
    save:
      query: "select * from {{ this }}"
      format: jsonl
"#;

    fn pipeline(temp: &TempDir) -> Pipeline {
        let definition = PipelineParser::parse(PIPELINE).unwrap();
        Pipeline::from_definition("sales", &definition)
            .unwrap()
            .with_paths(temp.path().join("compiled"), temp.path().join("download"))
    }

    fn calendar() -> Table {
        Table::new(["d"])
            .with_row([Value::from("2024-01-01")])
            .with_row([Value::from("2024-01-02")])
    }

    #[tokio::test]
    async fn test_compile_writes_artifacts() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::new().respond("from calendar", calendar()));
        let mut pipeline = pipeline(&temp).with_executor(executor);

        let result = pipeline.compile(ModeKind::Run, Variables::new()).await.unwrap();
        // days publishes outputs, so compiling it also executes it
        assert_eq!(result.count(NodeStatus::Executed), 1);
        assert_eq!(result.count(NodeStatus::Compiled), 1);

        let orders = std::fs::read_to_string(temp.path().join("compiled/run/orders.sql")).unwrap();
        assert!(orders.contains("day in ('2024-01-01', '2024-01-02')"));
        assert!(orders.starts_with("DROP TABLE IF EXISTS public.orders"));
    }

    #[tokio::test]
    async fn test_offline_compile_needs_connection_for_outputs() {
        let temp = TempDir::new().unwrap();
        let mut pipeline = pipeline(&temp);
        assert!(!pipeline.has_connection());

        let err = pipeline.compile(ModeKind::Run, Variables::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution(ExecutionError::HealthCheckFailed { .. })
        ));

        // save declares no outputs, so it compiles offline
        pipeline.compile(ModeKind::Save, Variables::new()).await.unwrap();
        assert!(temp.path().join("compiled/save/orders.sql").is_file());
    }

    #[tokio::test]
    async fn test_update_arguments_reaches_modes() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::new().respond("from calendar", calendar()));
        let recorder = executor.clone();
        let mut pipeline = pipeline(&temp).with_executor(executor);

        let mut args = Variables::new();
        args.insert("day".to_string(), Value::from("2025-06-01"));
        pipeline.update_arguments(args);
        assert_eq!(pipeline.arguments()["day"], Value::from("2025-06-01"));

        pipeline.compile(ModeKind::Run, Variables::new()).await.unwrap();
        assert!(recorder.statements()[0].contains("d >= '2025-06-01'"));
    }

    #[tokio::test]
    async fn test_clean_removes_generated_directories() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::new().respond("from public.orders", calendar()));
        let mut pipeline = pipeline(&temp).with_executor(executor);

        pipeline
            .execute(ModeKind::Save, &Selection::all(), Variables::new())
            .await
            .unwrap();
        assert!(temp.path().join("download/orders.jsonl").is_file());
        assert!(temp.path().join("compiled").is_dir());

        pipeline.clean_facets(&[CleanFacet::Data]).await.unwrap();
        assert!(!temp.path().join("download").exists());
        assert!(temp.path().join("compiled").is_dir());

        pipeline.clean().await.unwrap();
        assert!(!temp.path().join("compiled").exists());

        // Cleaning twice is fine
        pipeline.clean().await.unwrap();
    }

    #[test]
    fn test_clean_facet_from_str() {
        assert_eq!("Compiled".parse::<CleanFacet>().unwrap(), CleanFacet::Compiled);
        assert_eq!("data".parse::<CleanFacet>().unwrap(), CleanFacet::Data);
        assert!("logs".parse::<CleanFacet>().is_err());
    }
}
