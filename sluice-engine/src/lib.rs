// Sluice Engine Library
// Compiles templated data-movement pipelines into a DAG and executes them

pub mod connector;
pub mod dag;
pub mod error;
pub mod execution;
pub mod parser;
pub mod project;
pub mod template;
pub mod utils;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};

// Re-export parser types
pub use parser::{ParseError, ParseErrorKind, ParseResult, PipelineDefinition, PipelineParser, Value, Variables};

// Re-export template types
pub use template::{TemplateEngine, TemplateError};

// Re-export graph types
pub use dag::{Dag, DagDescription, GraphError, Mermaid, Mode, ModeKind, Node, Selection, Variant};

// Re-export collaborator types
pub use connector::{
    CommandConfig, CommandExecutor, ConnectorError, Executor, FileSink, FsScriptResolver, MethodPatterns,
    RecordingExecutor, ScriptResolver, Sink, Table,
};

// Re-export execution types
pub use execution::{
    progress_channel, CompileError, CompileOptions, DagExecutor, ExecutionContext, ExecutionError,
    ExecutionEvent, ExecutionResult, ExecutionStrategy, ExecutorConfig, NodeStatus, ProgressReceiver,
    ProgressSender,
};

// Re-export project types
pub use project::{CleanFacet, Pipeline, Project, RunContext};
