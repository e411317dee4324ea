//! Processed-file tracking
//!
//! The archive folder doubles as the record of what has been ingested: a
//! file is new when it has no archive copy, and updated when the source has
//! been modified more than [`MODIFIED_TOLERANCE`] after its archive copy.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::IngestResult;

use super::fs::SourceFs;
use super::models::SourceFile;

/// Slack for filesystems that store coarse modification times
pub const MODIFIED_TOLERANCE: Duration = Duration::from_secs(1);

/// What to do with a discovered file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Never archived
    New,
    /// Modified since it was archived
    Updated,
    Unchanged,
}

impl Decision {
    pub fn should_process(self) -> bool {
        !matches!(self, Decision::Unchanged)
    }
}

/// Compare a source mtime against the mtime of its archive copy
pub fn compare(source: SystemTime, archived: Option<SystemTime>) -> Decision {
    match archived {
        None => Decision::New,
        Some(archived) if source > archived + MODIFIED_TOLERANCE => Decision::Updated,
        Some(_) => Decision::Unchanged,
    }
}

/// Decides and records processing for the files of one source root
pub struct FileTracker<'a> {
    fs: &'a dyn SourceFs,
    archive_root: PathBuf,
}

impl<'a> FileTracker<'a> {
    pub fn new(fs: &'a dyn SourceFs, archive_root: PathBuf) -> Self {
        Self { fs, archive_root }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Create the archive folder if it does not exist yet
    pub async fn ensure_archive_root(&self) -> IngestResult<()> {
        if !self.fs.is_dir(&self.archive_root).await {
            self.fs.create_dir_all(&self.archive_root).await?;
            tracing::info!(path = %self.archive_root.display(), "Created archive folder");
        }
        Ok(())
    }

    pub fn archive_path(&self, file: &SourceFile) -> PathBuf {
        self.archive_root.join(&file.name)
    }

    pub async fn decide(&self, file: &SourceFile) -> IngestResult<Decision> {
        let archived = self.fs.modified(&self.archive_path(file)).await?;
        Ok(compare(file.modified, archived))
    }

    /// Record `file` as processed by archiving the `contents` that were read
    ///
    /// The copy carries the mtime seen when the file was listed, so a write
    /// that landed after the read shows up as [`Decision::Updated`] next cycle.
    pub async fn finalize(&self, file: &SourceFile, contents: &[u8]) -> IngestResult<()> {
        self.fs
            .write_archive(&self.archive_path(file), contents, file.modified)
            .await
    }
}
