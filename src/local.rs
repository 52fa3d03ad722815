//! Local workspace enumeration.

use crate::store::PARTIAL_PREFIX;
use crate::types::LocalFile;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Lazily walks `dirs` under `root`, yielding regular files.
///
/// Missing directories are skipped. Unreadable entries are logged and
/// skipped; they never stop the walk. Leftovers of interrupted downloads
/// are never yielded.
pub fn workspace_files<'a>(
    root: &'a Path,
    dirs: &'a [String],
) -> impl Iterator<Item = PathBuf> + 'a {
    dirs.iter()
        .map(move |dir| root.join(dir))
        .filter(|base| {
            let exists = base.exists();
            if !exists {
                debug!("Workspace directory {:?} does not exist, skipping", base);
            }
            exists
        })
        .flat_map(|base| WalkDir::new(base).into_iter())
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable workspace entry: {}", e);
                None
            }
        })
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && !is_partial_download(path))
}

fn is_partial_download(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.starts_with(PARTIAL_PREFIX))
}

/// Stats `path`; a missing file is `Ok(None)`, other failures are errors.
pub async fn stat_local(path: &Path) -> io::Result<Option<LocalFile>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(LocalFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            mtime: metadata.modified()?,
        })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Deletes the workspace directories under `root` ahead of a clean restore.
///
/// A symlinked workspace directory is unlinked; its target is left alone.
/// Trees that refuse removal are made owner-accessible and removed again.
/// Returns how many entries were removed.
pub async fn clean_workspace_dirs(root: &Path, dirs: &[String]) -> io::Result<usize> {
    let mut removed = 0;
    for dir in dirs {
        let target = root.join(dir);
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            remove_tree(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        info!("Removed {:?}", target);
        removed += 1;
    }
    Ok(removed)
}

async fn remove_tree(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Retrying removal of {:?} with owner access: {}", dir, e);
            grant_owner_access_recursive(dir).await;
            tokio::fs::remove_dir_all(dir).await
        }
        Err(e) => Err(e),
    }
}

async fn grant_owner_access_recursive(dir: &Path) {
    // Each directory is fixed up before the walk descends into it.
    for entry in WalkDir::new(dir) {
        let Ok(entry) = entry else { continue };
        if entry.path_is_symlink() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let mut permissions = metadata.permissions();
        grant_owner_access(&mut permissions);
        if let Err(e) = tokio::fs::set_permissions(entry.path(), permissions).await {
            debug!("Cannot change permissions of {:?}: {}", entry.path(), e);
        }
    }
}

#[cfg(unix)]
fn grant_owner_access(permissions: &mut std::fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    permissions.set_mode(permissions.mode() | 0o700);
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn grant_owner_access(permissions: &mut std::fs::Permissions) {
    permissions.set_readonly(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dirs() -> Vec<String> {
        vec![".codex".to_string(), ".vscode-server".to_string()]
    }

    #[test]
    fn walks_only_configured_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".codex/sessions")).unwrap();
        std::fs::write(root.path().join(".codex/config.toml"), "a").unwrap();
        std::fs::write(root.path().join(".codex/sessions/1.json"), "b").unwrap();
        std::fs::create_dir_all(root.path().join("other")).unwrap();
        std::fs::write(root.path().join("other/ignored.txt"), "c").unwrap();

        let dirs = dirs();
        let mut files: Vec<PathBuf> = workspace_files(root.path(), &dirs).collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                root.path().join(".codex/config.toml"),
                root.path().join(".codex/sessions/1.json"),
            ]
        );
    }

    #[test]
    fn interrupted_download_leftovers_are_skipped() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".codex")).unwrap();
        std::fs::write(root.path().join(".codex/auth.json"), "a").unwrap();
        std::fs::write(root.path().join(".codex/.r2sync-part-4242-0"), "half").unwrap();

        let dirs = dirs();
        let files: Vec<PathBuf> = workspace_files(root.path(), &dirs).collect();
        assert_eq!(files, vec![root.path().join(".codex/auth.json")]);
    }

    #[test]
    fn missing_workspace_yields_nothing() {
        let root = TempDir::new().unwrap();
        let dirs = dirs();
        assert_eq!(workspace_files(root.path(), &dirs).count(), 0);
    }

    #[tokio::test]
    async fn clean_removes_workspace_dirs_only() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".codex/sessions/2024")).unwrap();
        std::fs::write(root.path().join(".codex/sessions/2024/a.json"), "a").unwrap();
        std::fs::create_dir_all(root.path().join("project")).unwrap();
        std::fs::write(root.path().join("project/keep.txt"), "keep").unwrap();

        let removed = clean_workspace_dirs(root.path(), &dirs()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!root.path().join(".codex").exists());
        assert!(root.path().join("project/keep.txt").exists());

        // Nothing left to clean is not an error.
        assert_eq!(clean_workspace_dirs(root.path(), &dirs()).await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_unlinks_symlinked_dir_without_touching_target() {
        let root = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::fs::write(elsewhere.path().join("state.json"), "s").unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), root.path().join(".vscode-server")).unwrap();

        let removed = clean_workspace_dirs(root.path(), &dirs()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(std::fs::symlink_metadata(root.path().join(".vscode-server")).is_err());
        assert!(elsewhere.path().join("state.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_removes_read_only_trees() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let locked = root.path().join(".codex/locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("f.txt"), "f").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        clean_workspace_dirs(root.path(), &dirs()).await.unwrap();
        assert!(!root.path().join(".codex").exists());
    }

    #[tokio::test]
    async fn stat_reports_size_and_absence() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("f.bin");
        std::fs::write(&path, [0u8; 42]).unwrap();

        let local = stat_local(&path).await.unwrap().unwrap();
        assert_eq!(local.size, 42);
        assert!(stat_local(&root.path().join("missing")).await.unwrap().is_none());
    }
}
