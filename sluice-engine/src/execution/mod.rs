// Execution Module
// Compile/execute orchestration over the DAG

pub mod compiler;
pub mod context;
pub mod events;
pub mod executor;
pub mod variants;

// Re-export key types
pub use compiler::{
    Artifact, CompileError, CompileOptions, CompiledNode, Compiler, RenderFailure, RenderScope,
};
pub use context::{ExecutionContext, OverrideAccumulator};
pub use events::{
    progress_channel, EventSender, ExecutionEvent, LogLevel, NodeStatus, ProgressReceiver,
    ProgressSender,
};
pub use executor::{
    download_path, split_statements, DagExecutor, ExecutionError, ExecutionResult,
    ExecutionStrategy, ExecutorConfig, NodeReport,
};
pub use variants::{IterationProfile, VariantExpander};
