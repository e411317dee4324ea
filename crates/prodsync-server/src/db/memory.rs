//! In-process store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ProductionStore, TableName};
use crate::error::{IngestError, IngestResult};
use crate::ingest::models::{DedupKey, LossTimeEntry, ProductionRecord, StoredRecord};

#[derive(Default)]
struct State {
    next_id: i64,
    tables: HashMap<TableName, Vec<(i64, ProductionRecord)>>,
    loss_time: Vec<LossTimeEntry>,
    failing_tables: HashSet<TableName>,
    insert_batches: usize,
    stale_loss_time_checks: bool,
}

/// [`ProductionStore`] kept in memory
///
/// Mirrors the PostgreSQL store's semantics, including the unique
/// `(machine, end_time)` index on loss-time entries. Tables can be marked as
/// failing to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent insert into `table` fail
    pub fn fail_inserts(&self, table: &TableName) {
        self.state().failing_tables.insert(table.clone());
    }

    /// Make `loss_time_exists` always answer `false`, as if another writer
    /// committed the entry between the check and the insert
    pub fn stale_loss_time_checks(&self) {
        self.state().stale_loss_time_checks = true;
    }

    /// Rows of `table` in insertion order
    pub fn records(&self, table: &TableName) -> Vec<ProductionRecord> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// All loss-time entries in insertion order
    pub fn loss_entries(&self) -> Vec<LossTimeEntry> {
        self.state().loss_time.clone()
    }

    /// Number of successful batch inserts
    pub fn insert_batches(&self) -> usize {
        self.state().insert_batches
    }
}

fn matches(record: &ProductionRecord, key: &DedupKey) -> bool {
    match key {
        DedupKey::Serial(serial) => record.serial_number == *serial,
        DedupKey::Tuple {
            date,
            model,
            target,
            actual,
            sut,
        } => {
            record.date_time.date() >= *date
                && record.model == *model
                && record.target == *target
                && record.actual == *actual
                && record.sut == *sut
        }
    }
}

#[async_trait]
impl ProductionStore for MemoryStore {
    async fn record_exists(&self, table: &TableName, key: &DedupKey) -> IngestResult<bool> {
        Ok(self
            .state()
            .tables
            .get(table)
            .is_some_and(|rows| rows.iter().any(|(_, r)| matches(r, key))))
    }

    async fn insert_records(
        &self,
        table: &TableName,
        records: &[ProductionRecord],
    ) -> IngestResult<u64> {
        let mut state = self.state();
        if state.failing_tables.contains(table) {
            return Err(IngestError::Store(format!("insert into {} rejected", table)));
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            state.next_id += 1;
            rows.push((state.next_id, record.clone()));
        }
        state.tables.entry(table.clone()).or_default().extend(rows);
        state.insert_batches += 1;

        Ok(records.len() as u64)
    }

    async fn latest_two(&self, table: &TableName) -> IngestResult<Vec<StoredRecord>> {
        Ok(self
            .state()
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .rev()
                    .take(2)
                    .map(|(id, r)| StoredRecord {
                        id: *id,
                        date_time: r.date_time,
                        sut: r.sut,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn loss_time_exists(&self, entry: &LossTimeEntry) -> IngestResult<bool> {
        let state = self.state();
        if state.stale_loss_time_checks {
            return Ok(false);
        }
        Ok(loss_time_taken(&state, entry))
    }

    async fn insert_loss_time(&self, entry: &LossTimeEntry) -> IngestResult<()> {
        let mut state = self.state();
        if loss_time_taken(&state, entry) {
            return Err(IngestError::DuplicateKey(format!(
                "loss time ({}, {})",
                entry.machine, entry.end_time
            )));
        }
        state.loss_time.push(entry.clone());
        Ok(())
    }
}

/// The unique `(machine, end_time)` index
fn loss_time_taken(state: &State, entry: &LossTimeEntry) -> bool {
    state
        .loss_time
        .iter()
        .any(|e| e.machine == entry.machine && e.end_time == entry.end_time)
}
