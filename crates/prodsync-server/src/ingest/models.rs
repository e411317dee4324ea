//! Production data models

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::types::BigDecimal;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One accepted row of a line's production file
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionRecord {
    /// Local wall-clock time the row was accepted
    pub date_time: NaiveDateTime,
    pub model: String,
    pub daily_plan: i32,
    pub target: i32,
    pub actual: i32,
    pub weight: Option<BigDecimal>,
    pub efficiency: Option<BigDecimal>,
    /// Empty when the machine did not assign one
    pub serial_number: String,
    /// Standard unit time in seconds
    pub sut: i32,
}

impl ProductionRecord {
    /// Identity used for duplicate suppression
    ///
    /// A serial number identifies the unit on its own. Rows without one are
    /// matched on model, target, actual and sut among the rows accepted on or
    /// after the file's date. A file is never read before the day it is
    /// named for, so this covers every earlier ingest of the same file.
    pub fn dedup_key(&self, file_date: NaiveDate) -> DedupKey {
        if self.serial_number.is_empty() {
            DedupKey::Tuple {
                date: file_date,
                model: self.model.clone(),
                target: self.target,
                actual: self.actual,
                sut: self.sut,
            }
        } else {
            DedupKey::Serial(self.serial_number.clone())
        }
    }
}

/// Identity of a production row for duplicate checks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Serial(String),
    Tuple {
        /// Date of the source file; stored rows from before it never match
        date: NaiveDate,
        model: String,
        target: i32,
        actual: i32,
        sut: i32,
    },
}

/// The fields of a stored row the loss-time deriver reads back
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredRecord {
    /// Insertion sequence
    pub id: i64,
    pub date_time: NaiveDateTime,
    pub sut: i32,
}

/// Idle time inferred between two consecutive production events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossTimeEntry {
    /// Calendar date of the newer event
    pub date: NaiveDate,
    /// Destination table of the line the events belong to
    pub machine: String,
    /// Time of day of the older event
    pub time: NaiveTime,
    pub loss_seconds: i32,
    /// Timestamp of the newer event
    pub end_time: NaiveDateTime,
}

/// A text file discovered in a line's source folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: SystemTime,
    /// Parsed from a `yyyy-MM-dd` file stem, else the local date at discovery
    pub date: NaiveDate,
}

impl SourceFile {
    pub fn new(path: PathBuf, modified: SystemTime) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let date = date_from_file_name(&path).unwrap_or_else(|| Local::now().date_naive());
        Self {
            path,
            name,
            modified,
            date,
        }
    }
}

/// `2024-03-18.txt` → 2024-03-18; anything else → `None`
pub fn date_from_file_name(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
