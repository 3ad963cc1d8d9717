// Utility Functions
// Path resolution and project root detection

use std::path::{Path, PathBuf};

/// File that marks the root of a project
pub const PROJECT_FILE: &str = "project.yaml";

/// Find the project root by walking up from the given starting path.
///
/// Traverses ancestor directories looking for `landmark`. Returns `None` when
/// no ancestor contains it.
pub fn find_project_root(start: &Path, landmark: &str) -> Option<PathBuf> {
    // Canonicalize to resolve symlinks and get an absolute path
    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .find(|ancestor| ancestor.join(landmark).is_file())
        .map(Path::to_path_buf)
}

/// Join `path` onto `root` unless it is already absolute
pub fn resolve_path(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn test_find_project_root_from_nested_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join(PROJECT_FILE), "project: {name: demo}\n").unwrap();

        let sub = root.join("pipelines").join("sales");
        fs::create_dir_all(&sub).unwrap();

        let found = find_project_root(&sub, PROJECT_FILE).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());
    }

    #[test]
    fn test_landmark_directory_is_ignored() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("sluice-landmark")).unwrap();
        assert!(find_project_root(temp.path(), "sluice-landmark").is_none());
    }

    #[test]
    fn test_find_project_root_nonexistent_path() {
        let result = find_project_root(Path::new("/nonexistent/path/that/does/not/exist"), PROJECT_FILE);
        assert!(result.is_none());
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/srv/project");
        assert_eq!(resolve_path(root, "sql/a.sql"), PathBuf::from("/srv/project/sql/a.sql"));
        assert_eq!(resolve_path(root, "/tmp/a.sql"), PathBuf::from("/tmp/a.sql"));
    }
}
