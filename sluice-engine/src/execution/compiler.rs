// Compilation Phase
// Renders a node's mode template into executable artifacts

use crate::connector::{FsScriptResolver, MethodPatterns, ScriptResolver};
use crate::dag::{ModeKind, Node, TemplateSource};
use crate::execution::context::OverrideAccumulator;
use crate::execution::variants::VariantExpander;
use crate::parser::models::{Value, Variables};
use crate::template::{TemplateEngine, TemplateError};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Statement separator used when joining wrapped statements
pub const STATEMENT_SEPARATOR: &str = ";\n";

/// Errors raised while compiling a node
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("node '{node}' does not declare mode '{mode}'")]
    ModeNotDeclared { node: String, mode: ModeKind },

    #[error("node '{node}' ({mode}) has neither a query nor a script")]
    MissingTemplate { node: String, mode: ModeKind },

    #[error("node '{node}' ({mode}): cannot read script '{path}': {source}")]
    Script {
        node: String,
        mode: ModeKind,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("node '{node}' ({mode}): unknown method '{method}' (available: {available})")]
    UnknownMethod {
        node: String,
        mode: ModeKind,
        method: String,
        available: String,
    },

    #[error("node '{node}' ({mode}): {source}")]
    Render {
        node: String,
        mode: ModeKind,
        #[source]
        source: TemplateError,
    },

    #[error("node '{node}' ({mode}): variant '{variant}' iterates over sequences of unequal length ({lengths})")]
    VariantLengthMismatch {
        node: String,
        mode: ModeKind,
        variant: String,
        lengths: String,
    },

    #[error("node '{node}' ({mode}): variant '{variant}' parameter '{parameter}' is not a sequence: {message}")]
    NotASequence {
        node: String,
        mode: ModeKind,
        variant: String,
        parameter: String,
        message: String,
    },

    #[error("failed to write artifact '{}': {source}", path.display())]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to do when a template fails to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailure {
    /// Fail the run
    Abort,
    /// Replace the statement with `select * from <this>`
    Fallback,
    /// Leave the node out, treating it as an externally managed table
    Skip,
}

/// Compile behaviour knobs
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub run: RenderFailure,
    pub save: RenderFailure,
    /// Directory compiled artifacts are written under
    pub compile_path: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::strict()
    }
}

impl CompileOptions {
    /// Every render failure aborts
    pub fn strict() -> Self {
        Self {
            run: RenderFailure::Abort,
            save: RenderFailure::Abort,
            compile_path: None,
        }
    }

    /// `save` falls back to selecting the whole node, `run` skips the node
    pub fn soft() -> Self {
        Self {
            run: RenderFailure::Skip,
            save: RenderFailure::Fallback,
            compile_path: None,
        }
    }

    pub fn with_compile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.compile_path = Some(path.into());
        self
    }

    pub fn on_failure(&self, mode: ModeKind) -> RenderFailure {
        match mode {
            ModeKind::Run => self.run,
            ModeKind::Save => self.save,
        }
    }
}

/// One rendered statement text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Node name, or the rendered variant name
    pub name: String,
    pub text: String,
}

/// Result of compiling one node in one mode
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub node: String,
    pub mode: ModeKind,
    pub artifacts: Vec<Artifact>,
    /// Produced by variant expansion
    pub expanded: bool,
    /// Produced by the render-failure fallback
    pub recovered: bool,
}

impl CompiledNode {
    /// Text cached on the mode as its last compile
    pub fn last_text(&self) -> Option<&str> {
        self.artifacts.last().map(|a| a.text.as_str())
    }

    /// `{root}/{mode}/{node}.sql`, or `{root}/{mode}/{node}/{variant}.sql`
    pub fn artifact_path(&self, root: &Path, artifact: &Artifact) -> PathBuf {
        let dir = root.join(self.mode.as_str());
        if self.expanded {
            dir.join(&self.node).join(format!("{}.sql", artifact.name))
        } else {
            dir.join(format!("{}.sql", self.node))
        }
    }

    /// Write every artifact under `root`, returning the written paths
    pub async fn write(&self, root: &Path) -> Result<Vec<PathBuf>, CompileError> {
        let mut written = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            let path = self.artifact_path(root, artifact);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| CompileError::WriteArtifact {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&path, &artifact.text)
                .await
                .map_err(|source| CompileError::WriteArtifact {
                    path: path.clone(),
                    source,
                })?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Variables visible to one node's templates.
///
/// Precedence, lowest first: mode defaults, overrides, `this`, context.
#[derive(Debug, Clone, Copy)]
pub struct RenderScope<'a> {
    pub defaults: &'a Variables,
    pub target: &'a str,
    pub context: &'a Variables,
}

impl RenderScope<'_> {
    /// Merge the scope with `overrides`. With `hide_shadowed`, context
    /// entries whose key also appears in `overrides` are dropped so the
    /// override wins.
    pub fn build(&self, overrides: &Variables, hide_shadowed: bool) -> Variables {
        let mut vars = self.defaults.clone();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.insert("this".to_string(), Value::from(self.target));
        vars.extend(
            self.context
                .iter()
                .filter(|(k, _)| !(hide_shadowed && overrides.contains_key(*k)))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        vars
    }
}

/// Renders nodes into artifacts
#[derive(Clone)]
pub struct Compiler {
    engine: TemplateEngine,
    patterns: MethodPatterns,
    scripts: Arc<dyn ScriptResolver>,
    options: CompileOptions,
}

impl Compiler {
    /// Scripts resolve against the working directory until `with_scripts`
    pub fn new(patterns: MethodPatterns) -> Self {
        Self {
            engine: TemplateEngine::new(),
            patterns,
            scripts: Arc::new(FsScriptResolver::new(".")),
            options: CompileOptions::default(),
        }
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptResolver>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile `node` in `mode`. Returns `None` when a render failure made
    /// the node drop out of the run.
    pub fn compile(
        &self,
        node: &Node,
        mode: ModeKind,
        overrides: &mut OverrideAccumulator,
        context: &Variables,
    ) -> Result<Option<CompiledNode>, CompileError> {
        let declared = node.mode(mode).ok_or_else(|| CompileError::ModeNotDeclared {
            node: node.name.clone(),
            mode,
        })?;

        let template = self.source_text(node, mode)?;
        let target = node.target();
        let scope = RenderScope {
            defaults: &declared.defaults,
            target: &target,
            context,
        };

        // Expansion works on a copy so a recovered node leaks nothing
        let mut working = overrides.clone();
        let rendered = if declared.has_variants() {
            VariantExpander::new(&self.engine, &node.name, mode)
                .expand(&template, &declared.variants, &scope, &mut working)
                .map(|artifacts| (artifacts, true))
        } else {
            self.engine
                .render(&template, &scope.build(working.values(), false))
                .map(|text| {
                    let artifact = Artifact {
                        name: node.name.clone(),
                        text,
                    };
                    (vec![artifact], false)
                })
                .map_err(|source| CompileError::Render {
                    node: node.name.clone(),
                    mode,
                    source,
                })
        };

        match rendered {
            Ok((artifacts, expanded)) => {
                *overrides = working;
                tracing::debug!(node = %node.name, %mode, artifacts = artifacts.len(), "compiled");
                Ok(Some(CompiledNode {
                    node: node.name.clone(),
                    mode,
                    artifacts,
                    expanded,
                    recovered: false,
                }))
            }
            Err(CompileError::Render { source, .. }) => {
                self.recover(node, mode, &target, source)
            }
            Err(e) => Err(e),
        }
    }

    fn recover(
        &self,
        node: &Node,
        mode: ModeKind,
        target: &str,
        source: TemplateError,
    ) -> Result<Option<CompiledNode>, CompileError> {
        match self.options.on_failure(mode) {
            RenderFailure::Abort => Err(CompileError::Render {
                node: node.name.clone(),
                mode,
                source,
            }),
            RenderFailure::Fallback => {
                tracing::warn!(
                    node = %node.name,
                    %mode,
                    error = %source,
                    "render failed; falling back to selecting the whole node"
                );
                Ok(Some(CompiledNode {
                    node: node.name.clone(),
                    mode,
                    artifacts: vec![Artifact {
                        name: node.name.clone(),
                        text: format!("select * from {}", target),
                    }],
                    expanded: false,
                    recovered: true,
                }))
            }
            RenderFailure::Skip => {
                tracing::warn!(
                    node = %node.name,
                    %mode,
                    error = %source,
                    "render failed; skipping node as an external table"
                );
                Ok(None)
            }
        }
    }

    /// Resolve inline text or script content, then apply the wrapping method
    fn source_text(&self, node: &Node, mode: ModeKind) -> Result<String, CompileError> {
        let declared = node.mode(mode).ok_or_else(|| CompileError::ModeNotDeclared {
            node: node.name.clone(),
            mode,
        })?;

        let raw = match &declared.source {
            Some(TemplateSource::Inline(text)) => text.clone(),
            Some(TemplateSource::Script(path)) => {
                self.scripts
                    .read_script(path)
                    .map_err(|source| CompileError::Script {
                        node: node.name.clone(),
                        mode,
                        path: path.clone(),
                        source,
                    })?
            }
            None => {
                return Err(CompileError::MissingTemplate {
                    node: node.name.clone(),
                    mode,
                })
            }
        };

        let Some(method) = &declared.method else {
            return Ok(raw);
        };

        let statements = self
            .patterns
            .expand(method, raw.trim().trim_end_matches(';'), &node.target())
            .ok_or_else(|| CompileError::UnknownMethod {
                node: node.name.clone(),
                mode,
                method: method.clone(),
                available: self.patterns.names().join(", "),
            })?;
        Ok(statements.join(STATEMENT_SEPARATOR))
    }
}
