// DAG Executor
// Orchestrates compile and execute runs over the DAG in dependency order

use crate::connector::{ConnectorError, Executor, ScriptResolver, Sink, Table};
use crate::dag::{Dag, GraphError, ModeKind, Node, Selection};
use crate::execution::compiler::{Artifact, CompileError, CompileOptions, CompiledNode, Compiler};
use crate::execution::context::{ExecutionContext, OverrideAccumulator};
use crate::execution::events::{EventSender, ExecutionEvent, NodeStatus, ProgressSender};
use crate::parser::models::{OutputFormat, Value, Variables};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Errors that abort a compile or execute run
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("health check failed; refusing to run '{mode}' nodes")]
    HealthCheckFailed { mode: ModeKind },

    #[error("node '{node}' ({mode}): statement {index} of '{artifact}' failed: {source}")]
    Statement {
        node: String,
        mode: ModeKind,
        artifact: String,
        index: usize,
        #[source]
        source: ConnectorError,
    },

    #[error("duplicate output '{output}' from node '{node}' (already recorded by '{first}')")]
    DuplicateOutput {
        output: String,
        node: String,
        first: String,
    },

    #[error("node '{node}' ({mode}) declares output '{output}' but its result has no such column")]
    MissingOutput {
        node: String,
        mode: ModeKind,
        output: String,
    },

    #[error("node '{node}' ({mode}) declares outputs but produced no result")]
    NoResult { node: String, mode: ModeKind },

    #[error("node '{node}' ({mode}): failed to persist '{}': {source}", path.display())]
    Sink {
        node: String,
        mode: ModeKind,
        path: PathBuf,
        #[source]
        source: ConnectorError,
    },

    #[error("node '{node}' task aborted: {message}")]
    Aborted { node: String, message: String },
}

/// How scheduled nodes are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// One node at a time in schedule order
    #[default]
    Sequential,
    /// Nodes of one dependency layer run concurrently
    Layered,
}

/// Configuration for DAG execution
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub strategy: ExecutionStrategy,
    /// Maximum concurrent nodes per layer (0 = unlimited)
    pub max_parallel: usize,
}

impl ExecutorConfig {
    pub fn layered(max_parallel: usize) -> Self {
        Self {
            strategy: ExecutionStrategy::Layered,
            max_parallel,
        }
    }
}

/// Outcome of one node
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: String,
    pub status: NodeStatus,
    /// Artifact names, in order
    pub artifacts: Vec<String>,
    /// Row count of the last result
    pub rows: Option<usize>,
    pub duration: Duration,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub mode: ModeKind,
    /// Node reports in commit order
    pub nodes: Vec<NodeReport>,
    /// Outputs published during the run
    pub context: ExecutionContext,
    /// Caller overrides plus values merged by variant expansion
    pub overrides: OverrideAccumulator,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|r| r.node == name)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Render artifacts; only nodes that publish outputs are executed
    Compile,
    Execute,
}

/// Drives a DAG through compile and execute runs
pub struct DagExecutor {
    name: String,
    worker: NodeWorker,
    config: ExecutorConfig,
}

impl DagExecutor {
    /// Wrapping methods come from `executor.statement_patterns()`
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let compiler = Compiler::new(executor.statement_patterns());
        Self {
            name: "pipeline".to_string(),
            worker: NodeWorker {
                executor,
                compiler,
                sink: None,
                event_tx: None,
            },
            config: ExecutorConfig::default(),
        }
    }

    /// Name reported in run events
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.worker.compiler = self.worker.compiler.with_options(options);
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptResolver>) -> Self {
        self.worker.compiler = self.worker.compiler.with_scripts(scripts);
        self
    }

    /// Persist `save` results through `sink` under `download_path`
    pub fn with_sink(mut self, sink: Arc<dyn Sink>, download_path: impl Into<PathBuf>) -> Self {
        self.worker.sink = Some((sink, download_path.into()));
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.worker.event_tx = Some(tx);
        self
    }

    /// Render every scheduled node. Nodes that publish outputs are also
    /// executed so downstream templates can read them.
    pub async fn compile(
        &self,
        dag: &mut Dag,
        mode: ModeKind,
        overrides: Variables,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run(dag, mode, &Selection::all(), overrides, Phase::Compile)
            .await
    }

    /// Compile and run the selected nodes
    pub async fn execute(
        &self,
        dag: &mut Dag,
        mode: ModeKind,
        selection: &Selection,
        overrides: Variables,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run(dag, mode, selection, overrides, Phase::Execute)
            .await
    }

    async fn run(
        &self,
        dag: &mut Dag,
        mode: ModeKind,
        selection: &Selection,
        overrides: Variables,
        phase: Phase,
    ) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        dag.validate()?;
        let layers = dag.plan(mode, selection)?;
        let total: usize = layers.iter().map(Vec::len).sum();

        let needs_executor = match phase {
            Phase::Execute => total > 0,
            Phase::Compile => layers
                .iter()
                .flatten()
                .filter_map(|name| dag.node(name)?.mode(mode))
                .any(|m| m.store_results && !m.outputs.is_empty()),
        };
        if needs_executor && !self.worker.executor.health_check().await {
            self.worker
                .event_tx
                .send_event(ExecutionEvent::error("health check failed", None));
            return Err(ExecutionError::HealthCheckFailed { mode });
        }

        tracing::info!(pipeline = %self.name, %mode, nodes = total, ?phase, "starting run");
        self.worker
            .event_tx
            .send_event(ExecutionEvent::run_started(&self.name, mode, total));

        let mut state = RunState {
            context: ExecutionContext::new(),
            overrides: OverrideAccumulator::new(overrides),
            reports: Vec::new(),
        };

        let outcome = match self.config.strategy {
            ExecutionStrategy::Sequential => {
                self.run_sequential(dag, mode, &layers, phase, &mut state)
                    .await
            }
            ExecutionStrategy::Layered => {
                self.run_layered(dag, mode, &layers, phase, &mut state)
                    .await
            }
        };

        let duration = start.elapsed();
        self.worker.event_tx.send_event(ExecutionEvent::run_completed(
            &self.name,
            mode,
            outcome.is_ok(),
            duration,
        ));

        match outcome {
            Ok(()) => {
                tracing::info!(pipeline = %self.name, %mode, ?duration, "run finished");
                Ok(ExecutionResult {
                    mode,
                    nodes: state.reports,
                    context: state.context,
                    overrides: state.overrides,
                    duration,
                })
            }
            Err(e) => {
                tracing::error!(pipeline = %self.name, %mode, error = %e, "run failed");
                Err(e)
            }
        }
    }

    async fn run_sequential(
        &self,
        dag: &mut Dag,
        mode: ModeKind,
        layers: &[Vec<String>],
        phase: Phase,
        state: &mut RunState,
    ) -> Result<(), ExecutionError> {
        for name in layers.iter().flatten() {
            let node = dag
                .node(name)
                .ok_or_else(|| GraphError::NodeNotFound(name.clone()))?;
            let context = state.context.variables();
            let result = self
                .worker
                .run(node, mode, state.overrides.clone(), &context, phase)
                .await;

            match result {
                Ok(outcome) => state.commit(dag, mode, outcome, &self.worker.event_tx)?,
                Err(e) => {
                    self.worker
                        .event_tx
                        .send_event(ExecutionEvent::node_failed(name, mode, e.to_string()));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Run each layer concurrently. A failing node lets its siblings finish,
    /// then stops before the next layer.
    async fn run_layered(
        &self,
        dag: &mut Dag,
        mode: ModeKind,
        layers: &[Vec<String>],
        phase: Phase,
        state: &mut RunState,
    ) -> Result<(), ExecutionError> {
        for (index, layer) in layers.iter().enumerate() {
            self.worker.event_tx.send_event(ExecutionEvent::LayerStarted {
                index,
                nodes: layer.clone(),
            });

            let permits = match self.config.max_parallel {
                0 => layer.len().max(1),
                n => n,
            };
            let semaphore = Arc::new(Semaphore::new(permits));
            let context = Arc::new(state.context.variables());

            let mut tasks = JoinSet::new();
            for (position, name) in layer.iter().enumerate() {
                let node = dag
                    .node(name)
                    .cloned()
                    .ok_or_else(|| GraphError::NodeNotFound(name.clone()))?;
                let worker = self.worker.clone();
                let overrides = state.overrides.clone();
                let context = Arc::clone(&context);
                let semaphore = Arc::clone(&semaphore);

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = worker.run(&node, mode, overrides, &context, phase).await;
                    (position, result)
                });
            }

            let mut finished: Vec<(usize, Result<NodeOutcome, ExecutionError>)> = Vec::with_capacity(layer.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(entry) => finished.push(entry),
                    Err(e) => {
                        // The position of a panicked task is unknown; report the layer
                        finished.push((
                            layer.len(),
                            Err(ExecutionError::Aborted {
                                node: layer.join(", "),
                                message: e.to_string(),
                            }),
                        ));
                    }
                }
            }
            finished.sort_by_key(|(position, _)| *position);

            let mut first_error = None;
            for (position, result) in finished {
                match result {
                    Ok(outcome) => {
                        if let Err(e) = state.commit(dag, mode, outcome, &self.worker.event_tx) {
                            first_error.get_or_insert(e);
                        }
                    }
                    Err(e) => {
                        let node = layer.get(position).cloned().unwrap_or_default();
                        self.worker
                            .event_tx
                            .send_event(ExecutionEvent::node_failed(node, mode, e.to_string()));
                        first_error.get_or_insert(e);
                    }
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Mutable state of one run
struct RunState {
    context: ExecutionContext,
    overrides: OverrideAccumulator,
    reports: Vec<NodeReport>,
}

impl RunState {
    /// Publish a node's outputs and cache its compiled text
    fn commit(
        &mut self,
        dag: &mut Dag,
        mode: ModeKind,
        outcome: NodeOutcome,
        event_tx: &Option<ProgressSender>,
    ) -> Result<(), ExecutionError> {
        for (output, value) in outcome.outputs {
            let values = value.as_array().map_or(1, <[Value]>::len);
            self.context.record(&outcome.report.node, &output, value)?;
            event_tx.send_event(ExecutionEvent::OutputRecorded {
                node: outcome.report.node.clone(),
                output,
                values,
            });
        }

        if let Some(text) = outcome.compiled_text {
            if let Some(m) = dag
                .node_mut(&outcome.report.node)
                .and_then(|node| node.mode_mut(mode))
            {
                m.set_last_compiled(text);
            }
        }

        self.overrides.absorb_leaked(&outcome.overrides);
        self.reports.push(outcome.report);
        Ok(())
    }
}

/// What a node hands back to the run loop
struct NodeOutcome {
    report: NodeReport,
    compiled_text: Option<String>,
    outputs: Vec<(String, Value)>,
    overrides: OverrideAccumulator,
}

/// Compiles and runs single nodes; cheap to clone into tasks
#[derive(Clone)]
struct NodeWorker {
    executor: Arc<dyn Executor>,
    compiler: Compiler,
    sink: Option<(Arc<dyn Sink>, PathBuf)>,
    event_tx: Option<ProgressSender>,
}

impl NodeWorker {
    async fn run(
        &self,
        node: &Node,
        mode: ModeKind,
        mut overrides: OverrideAccumulator,
        context: &Variables,
        phase: Phase,
    ) -> Result<NodeOutcome, ExecutionError> {
        let start = Instant::now();
        self.event_tx
            .send_event(ExecutionEvent::node_started(&node.name, mode));

        let Some(compiled) = self.compiler.compile(node, mode, &mut overrides, context)? else {
            let reason = "template failed to render; treated as an external table";
            self.event_tx
                .send_event(ExecutionEvent::node_skipped(&node.name, mode, reason));
            return Ok(NodeOutcome {
                report: NodeReport {
                    node: node.name.clone(),
                    status: NodeStatus::Skipped,
                    artifacts: Vec::new(),
                    rows: None,
                    duration: start.elapsed(),
                },
                compiled_text: None,
                outputs: Vec::new(),
                overrides,
            });
        };

        self.event_tx.send_event(ExecutionEvent::NodeCompiled {
            node: node.name.clone(),
            mode,
            artifacts: compiled.artifacts.len(),
        });
        if compiled.recovered {
            self.event_tx.send_event(ExecutionEvent::warning(
                "template failed to render; using fallback statement",
                Some(node.name.clone()),
            ));
        }

        if let Some(root) = &self.compiler.options().compile_path {
            for (artifact, path) in compiled.artifacts.iter().zip(compiled.write(root).await?) {
                self.event_tx.send_event(ExecutionEvent::artifact_persisted(
                    &node.name,
                    &artifact.name,
                    path,
                ));
            }
        }

        let (store_results, declared_outputs, format) = match node.mode(mode) {
            Some(m) => (m.store_results, m.outputs.clone(), m.format),
            None => (false, Vec::new(), OutputFormat::default()),
        };
        let publishes = store_results && !declared_outputs.is_empty();

        let mut last: Option<Table> = None;
        let mut status = NodeStatus::Compiled;
        if phase == Phase::Execute || publishes {
            for artifact in &compiled.artifacts {
                let result = self.run_artifact(&node.name, mode, artifact).await?;
                if phase == Phase::Execute && mode.persists_results() {
                    if let Some(table) = &result {
                        self.persist(&compiled, artifact, table, format).await?;
                    }
                }
                if result.is_some() {
                    last = result;
                }
            }
            status = NodeStatus::Executed;
        }
        if compiled.recovered {
            status = NodeStatus::Recovered;
        }

        let mut outputs = Vec::new();
        if publishes {
            let table = last.as_ref().ok_or_else(|| ExecutionError::NoResult {
                node: node.name.clone(),
                mode,
            })?;
            for output in &declared_outputs {
                let column = table.column(output).ok_or_else(|| ExecutionError::MissingOutput {
                    node: node.name.clone(),
                    mode,
                    output: output.clone(),
                })?;
                outputs.push((output.clone(), Value::Array(column)));
            }
        }

        let duration = start.elapsed();
        self.event_tx
            .send_event(ExecutionEvent::node_completed(&node.name, mode, status, duration));
        tracing::debug!(node = %node.name, %mode, status = status.as_str(), ?duration, "node finished");

        Ok(NodeOutcome {
            report: NodeReport {
                node: node.name.clone(),
                status,
                artifacts: compiled.artifacts.iter().map(|a| a.name.clone()).collect(),
                rows: last.as_ref().map(Table::len),
                duration,
            },
            compiled_text: compiled.last_text().map(str::to_string),
            outputs,
            overrides,
        })
    }

    /// Run every statement of an artifact; keep the last result produced
    async fn run_artifact(
        &self,
        node: &str,
        mode: ModeKind,
        artifact: &Artifact,
    ) -> Result<Option<Table>, ExecutionError> {
        let mut last = None;
        for (index, statement) in split_statements(&artifact.text).iter().enumerate() {
            tracing::debug!(node, %mode, artifact = %artifact.name, index, "executing statement");
            let result = self
                .executor
                .execute(statement)
                .await
                .map_err(|source| ExecutionError::Statement {
                    node: node.to_string(),
                    mode,
                    artifact: artifact.name.clone(),
                    index,
                    source,
                })?;

            self.event_tx.send_event(ExecutionEvent::StatementExecuted {
                node: node.to_string(),
                artifact: artifact.name.clone(),
                statement_index: index,
                rows: result.as_ref().map(Table::len),
            });
            if result.is_some() {
                last = result;
            }
        }
        Ok(last)
    }

    async fn persist(
        &self,
        compiled: &CompiledNode,
        artifact: &Artifact,
        table: &Table,
        format: OutputFormat,
    ) -> Result<(), ExecutionError> {
        let Some((sink, root)) = &self.sink else {
            tracing::debug!(node = %compiled.node, "no sink configured; result not persisted");
            return Ok(());
        };

        let path = download_path(root, compiled, artifact, format);
        sink.persist(table, &path, format)
            .await
            .map_err(|source| ExecutionError::Sink {
                node: compiled.node.clone(),
                mode: compiled.mode,
                path: path.clone(),
                source,
            })?;
        self.event_tx.send_event(ExecutionEvent::artifact_persisted(
            &compiled.node,
            &artifact.name,
            path,
        ));
        Ok(())
    }
}

/// `{root}/{node}.{ext}`, or `{root}/{node}/{variant}.{ext}`
pub fn download_path(
    root: &Path,
    compiled: &CompiledNode,
    artifact: &Artifact,
    format: OutputFormat,
) -> PathBuf {
    if compiled.expanded {
        root.join(&compiled.node)
            .join(format!("{}.{}", artifact.name, format.extension()))
    } else {
        root.join(format!("{}.{}", compiled.node, format.extension()))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Split text on `;` outside quoted strings and comments. Comments stay in
/// the statement they belong to; statements holding only comments are dropped.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = Scan::Code;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            Scan::Quoted(q) => {
                if ch == q {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if ch == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    current.push(ch);
                    if let Some(close) = chars.next() {
                        current.push(close);
                    }
                    state = Scan::Code;
                    continue;
                }
            }
            Scan::Code => match ch {
                '-' if chars.peek() == Some(&'-') => state = Scan::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    current.push(ch);
                    if let Some(open) = chars.next() {
                        current.push(open);
                    }
                    state = Scan::BlockComment;
                    continue;
                }
                '\'' | '"' => {
                    state = Scan::Quoted(ch);
                    has_code = true;
                }
                ';' => {
                    if has_code {
                        statements.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                    has_code = false;
                    continue;
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
        }
        current.push(ch);
    }
    if has_code {
        statements.push(current);
    }

    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect()
}
