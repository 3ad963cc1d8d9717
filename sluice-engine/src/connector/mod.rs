// Connector Module
// Collaborator contracts the engine drives: statement executors, script
// resolution and result sinks

pub mod command;
pub mod recording;
pub mod script;
pub mod sink;

// Re-export key types
pub use command::{CommandConfig, CommandExecutor, ResultEncoding};
pub use recording::RecordingExecutor;
pub use script::{FsScriptResolver, ScriptResolver};
pub use sink::{FileSink, Sink};

use crate::parser::models::Value;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by collaborators
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("statement failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("statement timed out after {0} seconds")]
    Timeout(u64),

    #[error("could not decode result: {0}")]
    Decode(String),

    #[error("{0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tabular result of a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row<I, V>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).cloned().unwrap_or_default())
                .collect(),
        )
    }

    /// Rows as column -> value mappings
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                    .collect()
            })
            .collect()
    }
}

/// Expands one statement into the ordered statements of a wrapping method
pub type StatementPattern = Arc<dyn Fn(&str, &str) -> Vec<String> + Send + Sync>;

/// Named statement-wrapping methods (`method:` on a mode)
#[derive(Clone, Default)]
pub struct MethodPatterns {
    patterns: HashMap<String, StatementPattern>,
}

impl MethodPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    /// `seed`, `replace` and `truncate`
    pub fn standard() -> Self {
        Self::new()
            .with("seed", |statement, _| vec![statement.to_string()])
            .with("replace", |statement, target| {
                vec![
                    format!("DROP TABLE IF EXISTS {}", target),
                    format!("CREATE TABLE {} AS ({})", target, statement),
                ]
            })
            .with("truncate", |statement, target| {
                vec![
                    format!("TRUNCATE TABLE {}", target),
                    format!("INSERT INTO {} ({})", target, statement),
                ]
            })
    }

    /// Register or replace a method
    pub fn with<F>(mut self, name: impl Into<String>, pattern: F) -> Self
    where
        F: Fn(&str, &str) -> Vec<String> + Send + Sync + 'static,
    {
        self.patterns.insert(name.into(), Arc::new(pattern));
        self
    }

    /// Apply `method` to `statement` against `target`
    pub fn expand(&self, method: &str, statement: &str, target: &str) -> Option<Vec<String>> {
        self.patterns
            .get(method)
            .map(|pattern| pattern(statement, target))
    }

    pub fn contains(&self, method: &str) -> bool {
        self.patterns.contains_key(method)
    }

    /// Registered method names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.patterns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for MethodPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPatterns")
            .field("methods", &self.names())
            .finish()
    }
}

/// Capability to run statements against a database
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Run one statement; `None` when it produced no rows
    async fn execute(&self, statement: &str) -> Result<Option<Table>, ConnectorError>;

    /// Statement-wrapping methods this executor understands
    fn statement_patterns(&self) -> MethodPatterns {
        MethodPatterns::standard()
    }

    /// Whether the executor can currently reach its database
    async fn health_check(&self) -> bool;
}
