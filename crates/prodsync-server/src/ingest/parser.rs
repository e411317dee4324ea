//! Production file parser
//!
//! Line files are comma separated with a header row:
//!
//! ```text
//! Model,Target,Actual,NG,DailyPlan,SerialNumber,Sut
//! SPK-10,120,118,2,500,SN-000123,30
//! ```
//!
//! Rows with fewer than [`MIN_FIELDS`] fields are dropped without an error.
//! Numeric fields that do not parse become 0.

use chrono::NaiveDateTime;

use super::models::ProductionRecord;

pub const DELIMITER: char = ',';

/// Minimum number of fields for a row to be accepted
pub const MIN_FIELDS: usize = 6;

const MODEL: usize = 0;
const TARGET: usize = 1;
const ACTUAL: usize = 2;
// Index 3 carries the reject (NG) count, which is not stored.
const DAILY_PLAN: usize = 4;
const SERIAL_NUMBER: usize = 5;
// Optional: older firmware writes only the first six fields.
const SUT: usize = 6;

/// Records parsed from one file, in file order
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<ProductionRecord>,
    /// Non-blank data rows that were too short to use
    pub rejected: usize,
}

/// Parse a whole file body, skipping the header row and blank lines
///
/// Each record is stamped with a fresh reading of `now` as it is accepted, so
/// stamps follow file order.
pub fn parse_content(content: &str, mut now: impl FnMut() -> NaiveDateTime) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for raw in content.lines().skip(1) {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw, now()) {
            Some(record) => parsed.records.push(record),
            None => parsed.rejected += 1,
        }
    }

    parsed
}

/// Parse one data row; `None` when it has too few fields
pub fn parse_line(line: &str, accepted_at: NaiveDateTime) -> Option<ProductionRecord> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let int_at = |idx: usize| fields.get(idx).map_or(0, |f| lenient_int(f));

    Some(ProductionRecord {
        date_time: accepted_at,
        model: fields[MODEL].trim().to_string(),
        daily_plan: int_at(DAILY_PLAN),
        target: int_at(TARGET),
        actual: int_at(ACTUAL),
        weight: None,
        efficiency: None,
        serial_number: fields[SERIAL_NUMBER].trim().to_string(),
        sut: int_at(SUT),
    })
}

/// Integer parse that never fails: surrounding whitespace is ignored and
/// anything unparseable reads as 0
fn lenient_int(field: &str) -> i32 {
    field.trim().parse().unwrap_or(0)
}
