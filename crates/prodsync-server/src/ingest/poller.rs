//! Per-line polling
//!
//! One poll of a line lists the `*.txt` files in its source root and runs
//! each new or updated file through parse, dedup, insert, loss-time
//! derivation and archive. Files are handled one at a time in name order. A
//! failing file is logged and left unarchived so the next cycle retries it;
//! it never stops the rest of the line.

use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{LineConfig, MonitorConfig};
use crate::db::ProductionStore;
use crate::error::IngestResult;

use super::dedup::DuplicateChecker;
use super::fs::SourceFs;
use super::models::SourceFile;
use super::parser::parse_content;
use super::tracker::{Decision, FileTracker};
use super::writer::write_batch;

/// Counts for one processed file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub inserted: u64,
    pub duplicates: u64,
    /// Rows too short to use
    pub rejected: u64,
    pub loss_recorded: bool,
}

/// Result of handing one file to the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Already archived and not modified since
    Skipped,
    Processed(FileStats),
}

/// How far a line's poll got
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    #[default]
    Polled,
    /// No address configured
    Disabled,
    /// Source folder missing or unreachable
    Unavailable,
    /// Source folder could not be listed or archive folder not created
    Failed,
    /// Stopped between files by shutdown
    Cancelled,
}

/// Summary of one poll of one line
#[derive(Debug, Clone)]
pub struct LineReport {
    pub line: String,
    pub status: LineStatus,
    pub files_seen: u64,
    pub files_skipped: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub records_inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub loss_entries: u64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl LineReport {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            status: LineStatus::default(),
            files_seen: 0,
            files_skipped: 0,
            files_processed: 0,
            files_failed: 0,
            records_inserted: 0,
            duplicates: 0,
            rejected: 0,
            loss_entries: 0,
            started_at: Utc::now(),
            duration_secs: 0.0,
        }
    }

    fn with_status(mut self, status: LineStatus) -> Self {
        self.status = status;
        self
    }

    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Skipped => self.files_skipped += 1,
            FileOutcome::Processed(stats) => {
                self.files_processed += 1;
                self.records_inserted += stats.inserted;
                self.duplicates += stats.duplicates;
                self.rejected += stats.rejected;
                if stats.loss_recorded {
                    self.loss_entries += 1;
                }
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.files_failed += 1;
    }

    /// Whether anything beyond skipping happened
    pub fn has_activity(&self) -> bool {
        self.files_processed > 0 || self.files_failed > 0
    }

    fn complete(mut self) -> Self {
        self.duration_secs = (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0;
        self
    }
}

/// Polls production lines against a shared store and filesystem
pub struct LinePoller {
    store: Arc<dyn ProductionStore>,
    fs: Arc<dyn SourceFs>,
    monitor: Arc<MonitorConfig>,
}

impl LinePoller {
    pub fn new(
        store: Arc<dyn ProductionStore>,
        fs: Arc<dyn SourceFs>,
        monitor: Arc<MonitorConfig>,
    ) -> Self {
        Self { store, fs, monitor }
    }

    pub fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }

    /// Run one poll of `line`
    ///
    /// Never fails: every problem is logged and reflected in the report.
    pub async fn poll_line(&self, line: &LineConfig, token: &CancellationToken) -> LineReport {
        let report = LineReport::new(&line.name);

        if !line.is_enabled() {
            return report.with_status(LineStatus::Disabled);
        }

        let source_root = line.source_root(&self.monitor);
        if !self.fs.is_dir(&source_root).await {
            debug!(
                line = %line.name,
                path = %source_root.display(),
                "Source folder not reachable, skipping line"
            );
            return report.with_status(LineStatus::Unavailable);
        }

        let tracker = FileTracker::new(
            self.fs.as_ref(),
            self.monitor.archive_root(&source_root),
        );
        if let Err(e) = tracker.ensure_archive_root().await {
            error!(line = %line.name, error = %e, "Failed to create archive folder");
            return report.with_status(LineStatus::Failed);
        }

        let files = match self.fs.list_source_files(&source_root).await {
            Ok(files) => files,
            Err(e) => {
                error!(line = %line.name, error = %e, "Failed to list source folder");
                return report.with_status(LineStatus::Failed);
            }
        };

        let mut report = report;
        for file in &files {
            if token.is_cancelled() {
                debug!(line = %line.name, "Shutdown requested, stopping line");
                report.status = LineStatus::Cancelled;
                break;
            }

            report.files_seen += 1;
            match self.process_file(line, &tracker, file).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(
                        line = %line.name,
                        file = %file.name,
                        error = %e,
                        "Failed to process file"
                    );
                    report.record_failure();
                }
            }
        }

        let report = report.complete();
        if report.has_activity() {
            info!(
                line = %report.line,
                files_processed = report.files_processed,
                files_failed = report.files_failed,
                records_inserted = report.records_inserted,
                duplicates = report.duplicates,
                loss_entries = report.loss_entries,
                duration_secs = report.duration_secs,
                "Line poll complete"
            );
        }
        report
    }

    async fn process_file(
        &self,
        line: &LineConfig,
        tracker: &FileTracker<'_>,
        file: &SourceFile,
    ) -> IngestResult<FileOutcome> {
        match tracker.decide(file).await? {
            Decision::Unchanged => {
                debug!(line = %line.name, file = %file.name, "File unchanged, skipping");
                return Ok(FileOutcome::Skipped);
            }
            Decision::Updated => {
                info!(line = %line.name, file = %file.name, "File updated, reprocessing");
            }
            Decision::New => {}
        }

        let bytes = self.fs.read(&file.path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let parsed = parse_content(&content, || Local::now().naive_local());

        let store = self.store.as_ref();
        let mut checker = DuplicateChecker::new(store, &line.table_name, file.date);
        let mut batch = Vec::with_capacity(parsed.records.len());
        let mut duplicates = 0;
        for record in parsed.records {
            if checker.is_duplicate(&record).await? {
                duplicates += 1;
            } else {
                batch.push(record);
            }
        }

        let written = write_batch(store, &line.table_name, &batch).await?;
        tracker.finalize(file, &bytes).await?;

        let stats = FileStats {
            inserted: written.inserted,
            duplicates,
            rejected: parsed.rejected as u64,
            loss_recorded: written.loss_recorded,
        };
        if stats.inserted > 0 {
            info!(
                line = %line.name,
                file = %file.name,
                table = %line.table_name,
                inserted = stats.inserted,
                duplicates = stats.duplicates,
                "Inserted production records"
            );
        } else {
            debug!(
                line = %line.name,
                file = %file.name,
                duplicates = stats.duplicates,
                rejected = stats.rejected,
                "No new records in file"
            );
        }

        Ok(FileOutcome::Processed(stats))
    }
}
