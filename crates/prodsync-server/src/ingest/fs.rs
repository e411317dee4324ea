//! Filesystem access for line shares
//!
//! [`SourceFs`] is the seam between the poller and the network shares the
//! line PCs write to. [`LocalFs`] works on any path the OS can open, which
//! covers UNC paths on Windows and mounted shares elsewhere.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

use super::models::SourceFile;

/// Extension of the production files a line writes
pub const SOURCE_EXTENSION: &str = "txt";

/// File operations the line poller needs
#[async_trait]
pub trait SourceFs: Send + Sync {
    /// Whether `path` exists and is a directory
    async fn is_dir(&self, path: &Path) -> bool;

    /// `*.txt` files directly inside `dir`, sorted by file name
    async fn list_source_files(&self, dir: &Path) -> IngestResult<Vec<SourceFile>>;

    /// Modification time of `path`, `None` if it does not exist
    async fn modified(&self, path: &Path) -> IngestResult<Option<SystemTime>>;

    /// Whole file body
    async fn read(&self, path: &Path) -> IngestResult<Vec<u8>>;

    async fn create_dir_all(&self, path: &Path) -> IngestResult<()>;

    /// Replace `dest` with `contents`, stamped with `modified`
    ///
    /// A reader of `dest` sees either the previous file or the new one.
    async fn write_archive(
        &self,
        dest: &Path,
        contents: &[u8],
        modified: SystemTime,
    ) -> IngestResult<()>;
}

/// [`SourceFs`] over the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION))
}

/// Temporary name for an archive copy in progress, next to `dest`
fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

#[async_trait]
impl SourceFs for LocalFs {
    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn list_source_files(&self, dir: &Path) -> IngestResult<Vec<SourceFile>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| IngestError::io(dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::io(dir, e))?
        {
            let path = entry.path();
            if !is_source_file(&path) {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| IngestError::io(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(|e| IngestError::io(&path, e))?;
            files.push(SourceFile::new(path, modified));
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn modified(&self, path: &Path) -> IngestResult<Option<SystemTime>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|e| IngestError::io(path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::io(path, e)),
        }
    }

    async fn read(&self, path: &Path) -> IngestResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::io(path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> IngestResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| IngestError::io(path, e))
    }

    async fn write_archive(
        &self,
        dest: &Path,
        contents: &[u8],
        modified: SystemTime,
    ) -> IngestResult<()> {
        let staging = staging_path(dest);

        let result = async {
            tokio::fs::write(&staging, contents)
                .await
                .map_err(|e| IngestError::io(&staging, e))?;

            let target = staging.clone();
            tokio::task::spawn_blocking(move || {
                std::fs::OpenOptions::new()
                    .write(true)
                    .open(&target)
                    .and_then(|file| file.set_modified(modified))
                    .map_err(|e| IngestError::io(&target, e))
            })
            .await
            .map_err(|e| IngestError::Store(format!("archive task failed: {}", e)))??;

            tokio::fs::rename(&staging, dest)
                .await
                .map_err(|e| IngestError::io(dest, e))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        result
    }
}
