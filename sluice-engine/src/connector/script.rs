// Script Resolver
// Loads template text for modes that reference a script file

use std::io;
use std::path::{Path, PathBuf};

/// Reads script references into template text
pub trait ScriptResolver: Send + Sync {
    fn read_script(&self, path: &str) -> io::Result<String>;
}

/// Resolves scripts on the filesystem relative to a root directory
#[derive(Debug, Clone)]
pub struct FsScriptResolver {
    root: PathBuf,
}

impl FsScriptResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths are used as-is
    pub fn resolve(&self, path: &str) -> PathBuf {
        crate::utils::resolve_path(&self.root, path)
    }
}

impl ScriptResolver for FsScriptResolver {
    fn read_script(&self, path: &str) -> io::Result<String> {
        let resolved = self.resolve(path);
        tracing::debug!(script = %resolved.display(), "reading script");
        std::fs::read_to_string(resolved)
    }
}
