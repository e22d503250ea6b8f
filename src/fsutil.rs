//! Filesystem helpers for build-directory cleanup.

use std::path::Path;

use crate::error::{ClientError, Result};

/// Maximum recursion depth for directory removal. Build trees never get
/// close; hitting the cap means something is wrong with the tree.
const MAX_REMOVAL_DEPTH: usize = 64;

/// Remove a directory tree.
///
/// A missing path is treated as already removed. Symlinks are unlinked,
/// never followed, so a link into an unrelated tree cannot drag that tree
/// into the deletion. Any per-entry failure aborts and propagates.
pub async fn remove_dir_recursive(path: &Path) -> Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if !meta.is_dir() || meta.is_symlink() {
        tokio::fs::remove_file(path).await?;
        return Ok(());
    }
    remove_dir_inner(path, 0).await
}

fn remove_dir_inner(
    path: &Path,
    depth: usize,
) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
    Box::pin(async move {
        if depth >= MAX_REMOVAL_DEPTH {
            return Err(ClientError::RemovalTooDeep(path.to_path_buf()));
        }

        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let meta = tokio::fs::symlink_metadata(&entry_path).await?;
            if meta.is_dir() && !meta.is_symlink() {
                remove_dir_inner(&entry_path, depth + 1).await?;
            } else {
                tokio::fs::remove_file(&entry_path).await?;
            }
        }
        tokio::fs::remove_dir(path).await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("never-created");
        remove_dir_recursive(&absent).await.unwrap();
    }

    #[tokio::test]
    async fn test_removes_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("build");
        tokio::fs::create_dir_all(root.join("CMakeFiles/app.dir"))
            .await
            .unwrap();
        tokio::fs::write(root.join("CMakeCache.txt"), "# cache")
            .await
            .unwrap();
        tokio::fs::write(root.join("CMakeFiles/app.dir/main.o"), [0u8; 8])
            .await
            .unwrap();

        remove_dir_recursive(&root).await.unwrap();
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_target_survives() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        tokio::fs::create_dir(&outside).await.unwrap();
        tokio::fs::write(outside.join("keep.txt"), "important")
            .await
            .unwrap();

        let root = dir.path().join("build");
        tokio::fs::create_dir(&root).await.unwrap();
        tokio::fs::symlink(&outside, root.join("link"))
            .await
            .unwrap();

        remove_dir_recursive(&root).await.unwrap();
        assert!(!root.exists());
        // The link was unlinked, its target untouched.
        assert!(outside.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_depth_cap_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut path = dir.path().join("deep");
        for _ in 0..(MAX_REMOVAL_DEPTH + 2) {
            path.push("d");
        }
        tokio::fs::create_dir_all(&path).await.unwrap();

        let result = remove_dir_recursive(&dir.path().join("deep")).await;
        assert!(matches!(result, Err(ClientError::RemovalTooDeep(_))));
    }
}
