// Engine Errors
// Top-level error type aggregating every concern of the engine

use crate::connector::ConnectorError;
use crate::dag::GraphError;
use crate::execution::{CompileError, ExecutionError};
use crate::parser::ParseError;
use crate::template::TemplateError;
use crate::utils::PROJECT_FILE;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("no {} found in {} or any parent directory", PROJECT_FILE, .0.display())]
    ProjectNotFound(PathBuf),

    #[error("{} already exists", .0.display())]
    ProjectExists(PathBuf),

    #[error("invalid pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("invalid connection '{0}'")]
    UnknownConnection(String),

    #[error("invalid node '{node}' in pipeline '{pipeline}'")]
    UnknownNode { pipeline: String, node: String },

    #[error("invalid mode '{0}' (expected run, save or clean)")]
    InvalidMode(String),

    #[error("pipeline '{0}' has no connection")]
    NoConnection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
