//! Duplicate suppression for production rows
//!
//! A row is a duplicate when the destination table already holds a row with
//! the same [`DedupKey`], or when an earlier row of the same file produced the
//! same key. The store check and the later insert are not atomic: two writers
//! feeding the same table can both pass the check. Each table is fed by a
//! single line task, so in practice only one writer exists per table.

use chrono::NaiveDate;
use std::collections::HashSet;

use crate::db::{ProductionStore, TableName};
use crate::error::IngestResult;

use super::models::{DedupKey, ProductionRecord};

/// Duplicate checker for the rows of one file
pub struct DuplicateChecker<'a> {
    store: &'a dyn ProductionStore,
    table: &'a TableName,
    file_date: NaiveDate,
    pending: HashSet<DedupKey>,
}

impl<'a> DuplicateChecker<'a> {
    pub fn new(store: &'a dyn ProductionStore, table: &'a TableName, file_date: NaiveDate) -> Self {
        Self {
            store,
            table,
            file_date,
            pending: HashSet::new(),
        }
    }

    /// Check `record` and, if it is new, remember its key for the rest of the file
    pub async fn is_duplicate(&mut self, record: &ProductionRecord) -> IngestResult<bool> {
        let key = record.dedup_key(self.file_date);
        if self.pending.contains(&key) {
            return Ok(true);
        }
        if self.store.record_exists(self.table, &key).await? {
            return Ok(true);
        }
        self.pending.insert(key);
        Ok(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::NaiveDateTime;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn record(serial: &str, model: &str, actual: i32) -> ProductionRecord {
        ProductionRecord {
            date_time: at(8, 0, 0),
            model: model.to_string(),
            daily_plan: 500,
            target: 120,
            actual,
            weight: None,
            efficiency: None,
            serial_number: serial.to_string(),
            sut: 30,
        }
    }

    async fn exists_in_store(
        store: &MemoryStore,
        table: &TableName,
        record: &ProductionRecord,
        file_date: NaiveDate,
    ) -> IngestResult<bool> {
        DuplicateChecker::new(store, table, file_date)
            .is_duplicate(record)
            .await
    }

    #[tokio::test]
    async fn test_serial_match_ignores_other_fields() {
        let store = MemoryStore::new();
        let table = TableName::new("line_a").unwrap();
        let date = at(0, 0, 0).date();
        store
            .insert_records(&table, &[record("SN-1", "SPK-10", 100)])
            .await
            .unwrap();

        let other = record("SN-1", "SPK-99", 7);
        assert!(exists_in_store(&store, &table, &other, date).await.unwrap());
        assert!(!exists_in_store(&store, &table, &record("SN-2", "SPK-10", 100), date)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_tuple_match_covers_rows_since_file_date() {
        let store = MemoryStore::new();
        let table = TableName::new("line_a").unwrap();
        // Accepted on 2024-03-18.
        store
            .insert_records(&table, &[record("", "SPK-10", 100)])
            .await
            .unwrap();

        let accepted_on = at(0, 0, 0).date();
        let file_dated_earlier = accepted_on.pred_opt().unwrap();
        let file_dated_later = accepted_on.succ_opt().unwrap();
        let candidate = record("", "SPK-10", 100);
        assert!(exists_in_store(&store, &table, &candidate, accepted_on).await.unwrap());
        assert!(exists_in_store(&store, &table, &candidate, file_dated_earlier)
            .await
            .unwrap());
        assert!(!exists_in_store(&store, &table, &candidate, file_dated_later)
            .await
            .unwrap());
        assert!(!exists_in_store(&store, &table, &record("", "SPK-10", 101), accepted_on)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_checker_suppresses_repeats_within_file() {
        let store = MemoryStore::new();
        let table = TableName::new("line_a").unwrap();
        let mut checker = DuplicateChecker::new(&store, &table, at(0, 0, 0).date());

        assert!(!checker.is_duplicate(&record("SN-1", "A", 1)).await.unwrap());
        assert!(checker.is_duplicate(&record("SN-1", "B", 2)).await.unwrap());
        assert!(!checker.is_duplicate(&record("", "A", 1)).await.unwrap());
        assert!(checker.is_duplicate(&record("", "A", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let store = MemoryStore::new();
        let line_a = TableName::new("line_a").unwrap();
        let line_b = TableName::new("line_b").unwrap();
        store
            .insert_records(&line_a, &[record("SN-1", "A", 1)])
            .await
            .unwrap();

        let date = at(0, 0, 0).date();
        assert!(!exists_in_store(&store, &line_b, &record("SN-1", "A", 1), date)
            .await
            .unwrap());
    }
}
