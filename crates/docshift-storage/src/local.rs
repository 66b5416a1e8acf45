use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use docshift_core::constants::{INPUT_PARTITION, OUTPUT_PARTITION};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Per-client input and output directories under a single storage root.
#[derive(Debug, Clone)]
pub struct ClientPartitions {
    root: PathBuf,
}

/// A regular file found in an output partition.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// Name of the partition directory the file sits in (normally a client ID).
    pub partition: String,
    pub path: PathBuf,
    /// File name without its extension; a job ID for files the system wrote.
    pub stem: String,
    pub modified: Option<DateTime<Utc>>,
}

impl ClientPartitions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage root and both top-level partitions.
    pub async fn ensure_root(&self) -> StorageResult<()> {
        for dir in [self.input_root(), self.output_root()] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_root(&self) -> PathBuf {
        self.root.join(INPUT_PARTITION)
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join(OUTPUT_PARTITION)
    }

    pub fn input_dir(&self, client_id: Uuid) -> PathBuf {
        self.input_root().join(client_id.to_string())
    }

    pub fn output_dir(&self, client_id: Uuid) -> PathBuf {
        self.output_root().join(client_id.to_string())
    }

    /// `{root}/input/{client_id}/{job_id}_{filename}`
    pub fn input_path(&self, client_id: Uuid, job_id: Uuid, filename: &str) -> PathBuf {
        self.input_dir(client_id)
            .join(format!("{}_{}", job_id, filename))
    }

    /// `{root}/output/{client_id}/{job_id}.{ext}`
    pub fn output_path(&self, client_id: Uuid, job_id: Uuid, extension: &str) -> PathBuf {
        self.output_dir(client_id)
            .join(format!("{}.{}", job_id, extension))
    }

    /// Stream `reader` into `path`, creating parent directories. Returns the
    /// number of bytes written.
    pub async fn write_stream<R>(&self, path: &Path, reader: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        ensure_parent_dir(path).await?;
        let start = std::time::Instant::now();

        let mut file = fs::File::create(path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let bytes_copied = tokio::io::copy(reader, &mut file).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to write stream to file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.flush().await?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Input stored"
        );

        Ok(bytes_copied)
    }

    /// Remove both partitions of a client. Missing directories are fine.
    pub async fn remove_client(&self, client_id: Uuid) -> StorageResult<()> {
        for dir in [self.input_dir(client_id), self.output_dir(client_id)] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    tracing::debug!(path = %dir.display(), "Client partition removed");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to remove {}: {}",
                        dir.display(),
                        e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Regular files at depth two of the output partition (`output/*/*`).
    ///
    /// Symlinks and nested directories are not reported. Entries that vanish
    /// mid-scan are skipped.
    pub async fn list_output_files(&self) -> StorageResult<Vec<OutputFile>> {
        let output_root = self.output_root();
        let mut partitions = match fs::read_dir(&output_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ScanFailed(format!(
                    "Failed to read {}: {}",
                    output_root.display(),
                    e
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(partition) = partitions.next_entry().await? {
            let is_dir = partition
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let partition_name = partition.file_name().to_string_lossy().into_owned();

            let mut entries = match fs::read_dir(partition.path()).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if !file_type.is_file() {
                    continue;
                }

                let path = entry.path();
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let modified = entry
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);

                files.push(OutputFile {
                    partition: partition_name.clone(),
                    path,
                    stem,
                    modified,
                });
            }
        }

        Ok(files)
    }
}

/// Ensure parent directory exists
pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Delete a single file. Returns `false` if it was already gone.
pub async fn remove_file(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "File removed");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::DeleteFailed(format!(
            "Failed to delete file {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let partitions = ClientPartitions::new("/data");
        let client_id = Uuid::nil();
        let job_id = Uuid::from_u128(1);

        assert_eq!(
            partitions.input_path(client_id, job_id, "report.csv"),
            PathBuf::from(format!("/data/input/{}/{}_report.csv", client_id, job_id))
        );
        assert_eq!(
            partitions.output_path(client_id, job_id, "json"),
            PathBuf::from(format!("/data/output/{}/{}.json", client_id, job_id))
        );
    }

    #[tokio::test]
    async fn test_write_stream_creates_parents() {
        let dir = TempDir::new().unwrap();
        let partitions = ClientPartitions::new(dir.path());
        let path = partitions.input_path(Uuid::new_v4(), Uuid::new_v4(), "a.csv");

        let mut reader: &[u8] = b"a,b\n1,2\n";
        let written = partitions.write_stream(&path, &mut reader).await.unwrap();

        assert_eq!(written, 8);
        assert_eq!(fs::read(&path).await.unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_remove_file_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        assert!(!remove_file(&path).await.unwrap());

        fs::write(&path, b"x").await.unwrap();
        assert!(remove_file(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_client_removes_both_partitions() {
        let dir = TempDir::new().unwrap();
        let partitions = ClientPartitions::new(dir.path());
        let client_id = Uuid::new_v4();

        fs::create_dir_all(partitions.input_dir(client_id)).await.unwrap();
        fs::create_dir_all(partitions.output_dir(client_id)).await.unwrap();
        fs::write(partitions.output_dir(client_id).join("x.json"), b"{}")
            .await
            .unwrap();

        partitions.remove_client(client_id).await.unwrap();
        assert!(!partitions.input_dir(client_id).exists());
        assert!(!partitions.output_dir(client_id).exists());

        // Second removal is a no-op.
        partitions.remove_client(client_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_output_files() {
        let dir = TempDir::new().unwrap();
        let partitions = ClientPartitions::new(dir.path());
        assert!(partitions.list_output_files().await.unwrap().is_empty());

        let client_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let out = partitions.output_path(client_id, job_id, "json");
        ensure_parent_dir(&out).await.unwrap();
        fs::write(&out, b"[]").await.unwrap();
        fs::create_dir_all(partitions.output_dir(client_id).join("nested"))
            .await
            .unwrap();

        let files = partitions.list_output_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].partition, client_id.to_string());
        assert_eq!(files[0].stem, job_id.to_string());
        assert!(files[0].modified.is_some());
    }
}
