//! End-to-end pipeline tests
//!
//! Each test builds a share tree in a temporary directory laid out the way
//! the collector expects (`<share_root>/<ip>/<base_folder>`) and polls it
//! against an in-memory store.

use async_trait::async_trait;
use prodsync_server::config::{LineConfig, MonitorConfig};
use prodsync_server::db::{MemoryStore, ProductionStore, TableName};
use prodsync_server::ingest::{
    LinePoller, LineReport, LineStatus, LocalFs, Scheduler, SourceFile, SourceFs,
};
use prodsync_server::{IngestError, IngestResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HEADER: &str = "Model,Target,Actual,NG,DailyPlan,SerialNumber,Sut";

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,prodsync_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

struct Harness {
    share: TempDir,
    store: Arc<MemoryStore>,
    monitor: MonitorConfig,
}

impl Harness {
    fn new(lines: Vec<LineConfig>) -> Self {
        init_tracing();
        let share = TempDir::new().unwrap();
        let monitor = MonitorConfig {
            share_root: Some(share.path().to_path_buf()),
            lines,
            ..Default::default()
        };
        Self {
            share,
            store: Arc::new(MemoryStore::new()),
            monitor,
        }
    }

    fn single() -> (Self, LineConfig) {
        let line = line("Line A", "10.0.0.21", "line_a");
        let harness = Self::new(vec![line.clone()]);
        harness.create_source_root(&line);
        (harness, line)
    }

    fn source_root(&self, line: &LineConfig) -> PathBuf {
        line.source_root(&self.monitor)
    }

    fn archive_path(&self, line: &LineConfig, name: &str) -> PathBuf {
        self.monitor
            .archive_root(&self.source_root(line))
            .join(name)
    }

    fn create_source_root(&self, line: &LineConfig) {
        std::fs::create_dir_all(self.source_root(line)).unwrap();
    }

    fn write_file(&self, line: &LineConfig, name: &str, rows: &[&str]) -> PathBuf {
        let path = self.source_root(line).join(name);
        let mut content = String::from(HEADER);
        for row in rows {
            content.push('\n');
            content.push_str(row);
        }
        content.push('\n');
        std::fs::write(&path, content).unwrap();
        path
    }

    fn poller_with(&self, fs: Arc<dyn SourceFs>) -> LinePoller {
        let store: Arc<dyn ProductionStore> = self.store.clone();
        LinePoller::new(store, fs, Arc::new(self.monitor.clone()))
    }

    async fn poll(&self, line: &LineConfig) -> LineReport {
        self.poller_with(Arc::new(LocalFs::new()))
            .poll_line(line, &CancellationToken::new())
            .await
    }

    fn table(&self, line: &LineConfig) -> Vec<prodsync_server::ingest::ProductionRecord> {
        self.store.records(&line.table_name)
    }
}

fn line(name: &str, ip: &str, table: &str) -> LineConfig {
    LineConfig {
        name: name.to_string(),
        ip: ip.to_string(),
        table_name: TableName::new(table).unwrap(),
    }
}

fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

fn set_mtime(path: &Path, time: SystemTime) {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_reprocessing_unchanged_file_is_noop() {
    let (h, line) = Harness::single();
    h.write_file(
        &line,
        "2024-03-18.txt",
        &["SPK-10,120,1,0,500,SN-1,30", "SPK-10,120,2,0,500,SN-2,30"],
    );

    let first = h.poll(&line).await;
    assert_eq!(first.status, LineStatus::Polled);
    assert_eq!(first.files_processed, 1);
    assert_eq!(first.records_inserted, 2);

    let second = h.poll(&line).await;
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.files_processed, 0);
    assert_eq!(h.table(&line).len(), 2);
    assert_eq!(h.store.insert_batches(), 1);
}

#[tokio::test]
async fn test_serial_number_dedups_across_files() {
    let (h, line) = Harness::single();
    h.write_file(
        &line,
        "2024-03-18.txt",
        &["SPK-10,120,1,0,500,SN-1,30", "SPK-10,120,2,0,500,SN-2,30"],
    );
    h.poll(&line).await;

    h.write_file(
        &line,
        "2024-03-19.txt",
        &["SPK-99,80,7,0,300,SN-1,45", "SPK-10,120,3,0,500,SN-3,30"],
    );
    let report = h.poll(&line).await;

    assert_eq!(report.records_inserted, 1);
    assert_eq!(report.duplicates, 1);
    let serials: Vec<_> = h.table(&line).into_iter().map(|r| r.serial_number).collect();
    assert_eq!(serials, ["SN-1", "SN-2", "SN-3"]);
}

#[tokio::test]
async fn test_rows_without_serial_dedup_on_values() {
    let (h, line) = Harness::single();
    // Dated before the rows' accept stamps, as when an old file is rewritten.
    let name = "2024-03-18.txt";
    let path = h.write_file(&line, name, &["SPK-10,120,1,0,500,,30"]);
    h.poll(&line).await;

    h.write_file(
        &line,
        name,
        &["SPK-10,120,1,0,500,,30", "SPK-10,120,2,0,500,,30"],
    );
    set_mtime(&path, mtime(&h.archive_path(&line, name)) + Duration::from_secs(5));
    let report = h.poll(&line).await;

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.records_inserted, 1);
    assert_eq!(report.duplicates, 1);
    let actuals: Vec<_> = h.table(&line).into_iter().map(|r| r.actual).collect();
    assert_eq!(actuals, [1, 2]);
}

#[tokio::test]
async fn test_repeats_within_one_file_inserted_once() {
    let (h, line) = Harness::single();
    h.write_file(
        &line,
        "2024-03-18.txt",
        &[
            "SPK-10,120,1,0,500,SN-1,30",
            "SPK-10,120,1,0,500,SN-1,30",
            "SPK-10,120,5,0,500,,30",
            "SPK-10,120,5,0,500,,30",
        ],
    );

    let report = h.poll(&line).await;
    assert_eq!(report.records_inserted, 2);
    assert_eq!(report.duplicates, 2);
}

#[tokio::test]
async fn test_short_rows_rejected_and_sut_optional() {
    let (h, line) = Harness::single();
    h.write_file(
        &line,
        "2024-03-18.txt",
        &[
            "SPK-10,120,1,0,500",
            "",
            "SPK-10,120,2,0,500,SN-2",
            "SPK-10,abc,3,0,500,SN-3,45",
        ],
    );

    let report = h.poll(&line).await;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.records_inserted, 2);

    let rows = h.table(&line);
    assert_eq!(rows[0].serial_number, "SN-2");
    assert_eq!(rows[0].sut, 0);
    assert_eq!(rows[1].target, 0);
    assert_eq!(rows[1].sut, 45);
}

#[tokio::test]
async fn test_header_only_file_is_archived() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &[]);

    let report = h.poll(&line).await;
    assert_eq!(report.files_processed, 1);
    assert_eq!(h.store.insert_batches(), 0);
    assert!(h.archive_path(&line, "2024-03-18.txt").exists());
}

// ============================================================================
// Change detection and archive
// ============================================================================

#[tokio::test]
async fn test_updated_file_is_reprocessed() {
    let (h, line) = Harness::single();
    let path = h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);
    h.poll(&line).await;

    h.write_file(
        &line,
        "2024-03-18.txt",
        &["SPK-10,120,1,0,500,SN-1,30", "SPK-10,120,2,0,500,SN-2,30"],
    );
    let archived = mtime(&h.archive_path(&line, "2024-03-18.txt"));

    set_mtime(&path, archived + Duration::from_millis(500));
    let within_tolerance = h.poll(&line).await;
    assert_eq!(within_tolerance.files_skipped, 1);
    assert_eq!(h.table(&line).len(), 1);

    set_mtime(&path, archived + Duration::from_secs(2));
    let updated = h.poll(&line).await;
    assert_eq!(updated.files_processed, 1);
    assert_eq!(updated.records_inserted, 1);
    assert_eq!(h.table(&line).len(), 2);
}

#[tokio::test]
async fn test_archive_copy_is_identical_with_synced_mtime() {
    let (h, line) = Harness::single();
    let path = h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);
    let source_mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_710_748_800);
    set_mtime(&path, source_mtime);

    h.poll(&line).await;

    let archived = h.archive_path(&line, "2024-03-18.txt");
    assert_eq!(std::fs::read(&archived).unwrap(), std::fs::read(&path).unwrap());
    assert_eq!(mtime(&archived), source_mtime);
    assert!(path.exists(), "source must never be deleted");
}

#[tokio::test]
async fn test_store_failure_leaves_file_unarchived() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);
    h.write_file(&line, "2024-03-19.txt", &["SPK-10,120,2,0,500,SN-2,30"]);
    h.store.fail_inserts(&line.table_name);

    let report = h.poll(&line).await;
    assert_eq!(report.files_failed, 2);
    assert_eq!(report.status, LineStatus::Polled);
    assert!(!h.archive_path(&line, "2024-03-18.txt").exists());

    let retry = h.poll(&line).await;
    assert_eq!(retry.files_failed, 2);
    assert_eq!(retry.files_skipped, 0);
}

/// Local filesystem whose reads fail for one file name
struct UnreadableFs {
    inner: LocalFs,
    unreadable: String,
}

#[async_trait]
impl SourceFs for UnreadableFs {
    async fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path).await
    }

    async fn list_source_files(&self, dir: &Path) -> IngestResult<Vec<SourceFile>> {
        self.inner.list_source_files(dir).await
    }

    async fn modified(&self, path: &Path) -> IngestResult<Option<SystemTime>> {
        self.inner.modified(path).await
    }

    async fn read(&self, path: &Path) -> IngestResult<Vec<u8>> {
        if path.file_name().is_some_and(|n| n == self.unreadable.as_str()) {
            return Err(IngestError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked by writer"),
            ));
        }
        self.inner.read(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> IngestResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn write_archive(
        &self,
        dest: &Path,
        contents: &[u8],
        modified: SystemTime,
    ) -> IngestResult<()> {
        self.inner.write_archive(dest, contents, modified).await
    }
}

/// Local filesystem where the line writer appends a row right after the
/// first read
struct AppendingFs {
    inner: LocalFs,
    row: &'static str,
    appended: AtomicBool,
}

#[async_trait]
impl SourceFs for AppendingFs {
    async fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path).await
    }

    async fn list_source_files(&self, dir: &Path) -> IngestResult<Vec<SourceFile>> {
        self.inner.list_source_files(dir).await
    }

    async fn modified(&self, path: &Path) -> IngestResult<Option<SystemTime>> {
        self.inner.modified(path).await
    }

    async fn read(&self, path: &Path) -> IngestResult<Vec<u8>> {
        let contents = self.inner.read(path).await?;
        if !self.appended.swap(true, Ordering::SeqCst) {
            let before = mtime(path);
            let mut grown = contents.clone();
            grown.extend_from_slice(self.row.as_bytes());
            grown.push(b'\n');
            std::fs::write(path, grown).unwrap();
            set_mtime(path, before + Duration::from_secs(10));
        }
        Ok(contents)
    }

    async fn create_dir_all(&self, path: &Path) -> IngestResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn write_archive(
        &self,
        dest: &Path,
        contents: &[u8],
        modified: SystemTime,
    ) -> IngestResult<()> {
        self.inner.write_archive(dest, contents, modified).await
    }
}

#[tokio::test]
async fn test_rows_appended_during_processing_are_picked_up() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);

    let poller = h.poller_with(Arc::new(AppendingFs {
        inner: LocalFs::new(),
        row: "SPK-10,120,2,0,500,SN-2,30",
        appended: AtomicBool::new(false),
    }));
    let first = poller.poll_line(&line, &CancellationToken::new()).await;
    assert_eq!(first.files_processed, 1);
    let serials: Vec<_> = h.table(&line).into_iter().map(|r| r.serial_number).collect();
    assert_eq!(serials, ["SN-1"]);

    let second = h.poll(&line).await;
    assert_eq!(second.files_processed, 1);
    assert_eq!(second.records_inserted, 1);
    let serials: Vec<_> = h.table(&line).into_iter().map(|r| r.serial_number).collect();
    assert_eq!(serials, ["SN-1", "SN-2"]);
}

#[tokio::test]
async fn test_read_failure_only_affects_that_file() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);
    h.write_file(&line, "2024-03-19.txt", &["SPK-10,120,2,0,500,SN-2,30"]);

    let poller = h.poller_with(Arc::new(UnreadableFs {
        inner: LocalFs::new(),
        unreadable: "2024-03-18.txt".to_string(),
    }));
    let report = poller.poll_line(&line, &CancellationToken::new()).await;

    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_processed, 1);
    assert!(!h.archive_path(&line, "2024-03-18.txt").exists());
    assert!(h.archive_path(&line, "2024-03-19.txt").exists());
    assert_eq!(h.table(&line)[0].serial_number, "SN-2");
}

// ============================================================================
// Loss time
// ============================================================================

#[tokio::test]
async fn test_loss_time_recorded_between_files() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,0"]);
    let first = h.poll(&line).await;
    assert_eq!(first.loss_entries, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    h.write_file(&line, "2024-03-19.txt", &["SPK-10,120,2,0,500,SN-2,0"]);
    let second = h.poll(&line).await;
    assert_eq!(second.loss_entries, 1);

    let rows = h.table(&line);
    let entries = h.store.loss_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].machine, "line_a");
    assert_eq!(entries[0].end_time, rows[1].date_time);
    assert_eq!(entries[0].time, rows[0].date_time.time());

    // Nothing new to insert, so nothing new to derive.
    h.poll(&line).await;
    assert_eq!(h.store.loss_entries().len(), 1);
}

#[tokio::test]
async fn test_single_row_never_derives_loss() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,0"]);

    let report = h.poll(&line).await;
    assert_eq!(report.records_inserted, 1);
    assert!(h.store.loss_entries().is_empty());
}

// ============================================================================
// Lines and scheduling
// ============================================================================

#[tokio::test]
async fn test_line_without_address_is_skipped() {
    let line = line("Line A", "", "line_a");
    let h = Harness::new(vec![line.clone()]);

    let report = h.poll(&line).await;
    assert_eq!(report.status, LineStatus::Disabled);
    assert_eq!(report.files_seen, 0);
}

#[tokio::test]
async fn test_missing_source_folder_is_skipped() {
    let line = line("Line A", "10.0.0.21", "line_a");
    let h = Harness::new(vec![line.clone()]);

    let report = h.poll(&line).await;
    assert_eq!(report.status, LineStatus::Unavailable);
    assert!(!h.share.path().join("10.0.0.21").exists());
}

#[tokio::test]
async fn test_cancelled_line_stops_before_next_file() {
    let (h, line) = Harness::single();
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);

    let token = CancellationToken::new();
    token.cancel();
    let report = h
        .poller_with(Arc::new(LocalFs::new()))
        .poll_line(&line, &token)
        .await;

    assert_eq!(report.status, LineStatus::Cancelled);
    assert_eq!(report.files_seen, 0);
    assert!(h.table(&line).is_empty());
}

#[tokio::test]
async fn test_cycle_processes_all_lines() {
    let line_a = line("Line A", "10.0.0.21", "line_a");
    let line_b = line("Line B", "10.0.0.22", "line_b");
    let disabled = line("Line C", "", "line_c");
    let h = Harness::new(vec![line_a.clone(), line_b.clone(), disabled]);
    h.create_source_root(&line_a);
    h.create_source_root(&line_b);
    h.write_file(&line_a, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-A1,30"]);
    h.write_file(
        &line_b,
        "2024-03-18.txt",
        &["SPK-20,90,1,0,400,SN-B1,30", "SPK-20,90,2,0,400,SN-B2,30"],
    );

    let store: Arc<dyn ProductionStore> = h.store.clone();
    let scheduler = Scheduler::new(h.monitor.clone(), store, Arc::new(LocalFs::new()));
    let reports = scheduler.run_cycle(&CancellationToken::new()).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(h.table(&line_a).len(), 1);
    assert_eq!(h.table(&line_b).len(), 2);
}

#[tokio::test]
async fn test_scheduler_polls_until_cancelled() {
    let (mut h, line) = Harness::single();
    h.monitor.poll_interval_secs = 60;
    h.write_file(&line, "2024-03-18.txt", &["SPK-10,120,1,0,500,SN-1,30"]);

    let store: Arc<dyn ProductionStore> = h.store.clone();
    let token = CancellationToken::new();
    let handle = Scheduler::new(h.monitor.clone(), store, Arc::new(LocalFs::new()))
        .start(token.clone());

    let archived = h.archive_path(&line, "2024-03-18.txt");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !archived.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first cycle should archive the file");

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler should stop during its sleep")
        .unwrap();
    assert_eq!(h.table(&line).len(), 1);
}
