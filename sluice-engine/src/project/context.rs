// Run Context
// Explicit project root carried through loading and execution

use crate::error::{EngineError, EngineResult};
use crate::utils::{find_project_root, resolve_path, PROJECT_FILE};

use std::path::{Path, PathBuf};

/// Where a run takes place; every relative path resolves against `root`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    root: PathBuf,
}

impl RunContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the nearest directory holding `project.yaml`
    pub fn discover(start: &Path) -> EngineResult<Self> {
        find_project_root(start, PROJECT_FILE)
            .map(Self::new)
            .ok_or_else(|| EngineError::ProjectNotFound(start.to_path_buf()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_file(&self) -> PathBuf {
        self.root.join(PROJECT_FILE)
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_path(&self.root, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(PROJECT_FILE), "project: {name: demo}\n").unwrap();
        let nested = temp.path().join("pipelines");
        std::fs::create_dir(&nested).unwrap();

        let ctx = RunContext::discover(&nested).unwrap();
        assert_eq!(ctx.root(), temp.path().canonicalize().unwrap());
        assert_eq!(ctx.resolve("compiled"), ctx.root().join("compiled"));
        assert_eq!(ctx.resolve("/tmp/out"), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_discover_without_project() {
        let temp = TempDir::new().unwrap();
        let err = RunContext::discover(temp.path()).unwrap_err();
        assert!(matches!(err, EngineError::ProjectNotFound(_)));
    }
}
