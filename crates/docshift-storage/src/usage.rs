use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{StorageError, StorageResult};

/// Total size in bytes of the regular files under `root`.
///
/// Symlinks are neither followed nor counted. A missing root is empty, and
/// entries that vanish or cannot be read during the walk are skipped.
pub async fn directory_size(root: &Path) -> StorageResult<u64> {
    let start = std::time::Instant::now();

    match fs::symlink_metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(0),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(StorageError::ScanFailed(format!(
                "Failed to stat {}: {}",
                root.display(),
                e
            )))
        }
    }

    let mut total: u64 = 0;
    let mut files: u64 = 0;
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(path = %dir.display(), error = %e, "Directory listing interrupted");
                    break;
                }
            };

            // symlink_metadata: never follow links
            let meta = match fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                total = total.saturating_add(meta.len());
                files += 1;
            }
        }
    }

    tracing::debug!(
        path = %root.display(),
        size_bytes = total,
        files = files,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Directory size computed"
    );

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(directory_size(&dir.path().join("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sums_nested_regular_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).await.unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).await.unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 50]).await.unwrap();
        fs::write(dir.path().join("sub/deeper/c"), vec![0u8; 7])
            .await
            .unwrap();

        assert_eq!(directory_size(dir.path()).await.unwrap(), 157);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_not_counted() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("big");
        fs::write(&target, vec![0u8; 4096]).await.unwrap();
        fs::write(dir.path().join("real"), vec![0u8; 10]).await.unwrap();

        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("dirlink")).unwrap();

        assert_eq!(directory_size(dir.path()).await.unwrap(), 10);
    }
}
