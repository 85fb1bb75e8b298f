//! Directory enumeration for hashing and verification.
//!
//! Walks a target tree without following symlinks, applies exclude patterns,
//! and emits one work item per regular file or symlink. The root itself is
//! resolved through any top-level symlink once, so a `current -> release`
//! style deployment link scans the release directory it points at.

use crate::pattern;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    File,
    Symlink,
}

/// One filesystem object to be fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub abs_path: PathBuf,
    /// Forward-slash relative path from the resolved root.
    pub rel_path: String,
    pub kind: WorkKind,
}

/// Resolves the scan root, following a top-level symlink if present.
pub fn resolve_root(root: &Path) -> Result<PathBuf, WalkError> {
    root.canonicalize().map_err(|e| io_error(e, root))
}

/// Enumerates the tree under `root`, returning the resolved root and the
/// work items that survive the exclude patterns.
///
/// Directories matching an exclude (or the `prefix/**` prune rule) are
/// skipped with their whole subtree. Symlinks inside the tree are emitted
/// as leaves and never followed. The first I/O error aborts the walk.
pub fn collect_work_items(
    root: &Path,
    excludes: &[String],
) -> Result<(PathBuf, Vec<WorkItem>), WalkError> {
    let root = resolve_root(root)?;

    let mut items = Vec::with_capacity(64);
    walk_tree(&root, &root, excludes, &mut items)?;

    Ok((root, items))
}

fn walk_tree(
    root: &Path,
    dir: &Path,
    excludes: &[String],
    items: &mut Vec<WorkItem>,
) -> Result<(), WalkError> {
    debug!("Walking {}", dir.display());

    let read_dir = std::fs::read_dir(dir).map_err(|e| io_error(e, dir))?;

    for entry in read_dir {
        let entry = entry.map_err(WalkError::Io)?;
        let path = entry.path();

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| io_error(e, &path))?;
        let rel_path = relative_path(root, &path)?;

        let file_type = metadata.file_type();

        if file_type.is_dir() {
            if pattern::matches_any(&rel_path, excludes)
                || pattern::prunes_directory(&rel_path, excludes)
            {
                debug!("Pruning excluded directory {rel_path}");
                continue;
            }
            walk_tree(root, &path, excludes, items)?;
        } else if pattern::matches_any(&rel_path, excludes) {
            debug!("Skipping excluded entry {rel_path}");
        } else {
            let kind = if file_type.is_symlink() {
                WorkKind::Symlink
            } else {
                WorkKind::File
            };
            items.push(WorkItem {
                abs_path: path,
                rel_path,
                kind,
            });
        }
    }

    Ok(())
}

/// Computes the forward-slash relative path of `path` under `root`.
fn relative_path(root: &Path, path: &Path) -> Result<String, WalkError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| WalkError::Io(std::io::Error::other(e)))?;

    let mut out = String::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| WalkError::NonUtf8Path(path.to_path_buf()))?;
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }

    Ok(out)
}

fn io_error(e: std::io::Error, path: &Path) -> WalkError {
    if e.kind() == ErrorKind::PermissionDenied {
        WalkError::PermissionDenied(path.to_path_buf())
    } else {
        WalkError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rel_paths(items: &[WorkItem]) -> Vec<&str> {
        let mut paths: Vec<&str> = items.iter().map(|i| i.rel_path.as_str()).collect();
        paths.sort_unstable();
        paths
    }

    #[test]
    fn test_collect_simple_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::write(root.join("file1.txt"), "content1").unwrap();
        fs::create_dir(root.join("dir1")).unwrap();
        fs::write(root.join("dir1/file2.txt"), "content2").unwrap();

        let (_, items) = collect_work_items(root, &[]).unwrap();

        assert_eq!(rel_paths(&items), vec!["dir1/file2.txt", "file1.txt"]);
        assert!(items.iter().all(|i| i.kind == WorkKind::File));
    }

    #[test]
    fn test_directories_are_not_emitted() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("empty")).unwrap();

        let (_, items) = collect_work_items(temp.path(), &[]).unwrap();

        assert!(items.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_emitted_as_leaf() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::write(root.join("target.txt"), "content").unwrap();
        std::os::unix::fs::symlink("target.txt", root.join("link")).unwrap();

        let (_, items) = collect_work_items(root, &[]).unwrap();

        let link = items.iter().find(|i| i.rel_path == "link").unwrap();
        assert_eq!(link.kind, WorkKind::Symlink);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_directory_not_descended() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("real")).unwrap();
        fs::write(root.join("real/inner.txt"), "content").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

        let (_, items) = collect_work_items(root, &[]).unwrap();

        // The alias is a single symlink leaf; its target's contents appear
        // only under their real path.
        assert_eq!(rel_paths(&items), vec!["alias", "real/inner.txt"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_root_symlink_resolved_once() {
        let temp = TempDir::new().unwrap();
        let release = temp.path().join("releases/20240101");
        fs::create_dir_all(&release).unwrap();
        fs::write(release.join("app.bin"), "binary").unwrap();

        let current = temp.path().join("current");
        std::os::unix::fs::symlink(&release, &current).unwrap();

        let (resolved, items) = collect_work_items(&current, &[]).unwrap();

        assert_eq!(resolved, release.canonicalize().unwrap());
        assert_eq!(rel_paths(&items), vec!["app.bin"]);
    }

    #[test]
    fn test_excluded_file_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::write(root.join("app.go"), "package main").unwrap();
        fs::write(root.join("debug.log"), "log line").unwrap();

        let excludes = vec!["*.log".to_string()];
        let (_, items) = collect_work_items(root, &excludes).unwrap();

        assert_eq!(rel_paths(&items), vec!["app.go"]);
    }

    #[test]
    fn test_excluded_directory_pruned() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("cache")).unwrap();
        fs::write(root.join("cache/data.bin"), "cached").unwrap();
        fs::write(root.join("keep.txt"), "kept").unwrap();

        let excludes = vec!["cache/**".to_string()];
        let (_, items) = collect_work_items(root, &excludes).unwrap();

        assert_eq!(rel_paths(&items), vec!["keep.txt"]);
    }

    #[test]
    fn test_nested_directory_pruned_by_anywhere_pattern() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("web/node_modules/pkg")).unwrap();
        fs::write(root.join("web/node_modules/pkg/index.js"), "js").unwrap();
        fs::write(root.join("web/app.js"), "js").unwrap();

        let excludes = vec!["**/node_modules/**".to_string()];
        let (_, items) = collect_work_items(root, &excludes).unwrap();

        assert_eq!(rel_paths(&items), vec!["web/app.js"]);
    }

    #[test]
    fn test_nonexistent_root_fails() {
        let result = collect_work_items(Path::new("/nonexistent/root/12345"), &[]);

        assert!(matches!(result, Err(WalkError::Io(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_directory_fails() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let restricted = temp.path().join("restricted");
        fs::create_dir(&restricted).unwrap();
        fs::write(restricted.join("hidden.txt"), "secret").unwrap();

        let mut perms = fs::metadata(&restricted).unwrap().permissions();
        perms.set_mode(0o000);
        fs::set_permissions(&restricted, perms.clone()).unwrap();

        if fs::read_dir(&restricted).is_ok() {
            // Permission bits are not enforced for this user (running as
            // root); nothing to assert.
            perms.set_mode(0o755);
            fs::set_permissions(&restricted, perms).unwrap();
            return;
        }

        let result = collect_work_items(temp.path(), &[]);

        perms.set_mode(0o755);
        fs::set_permissions(&restricted, perms).unwrap();

        assert!(matches!(result, Err(WalkError::PermissionDenied(_))));
    }

    #[test]
    fn test_relative_paths_use_forward_slashes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/c.txt"), "x").unwrap();

        let (_, items) = collect_work_items(temp.path(), &[]).unwrap();

        assert_eq!(items[0].rel_path, "a/b/c.txt");
        assert!(!items[0].rel_path.starts_with('/'));
    }
}
