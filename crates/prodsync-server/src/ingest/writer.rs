//! Batch writer for accepted production rows

use crate::db::{ProductionStore, TableName};
use crate::error::IngestResult;

use super::loss_time::derive_loss_time;
use super::models::ProductionRecord;

/// Result of writing one file's batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub inserted: u64,
    /// A loss-time entry was written after the insert
    pub loss_recorded: bool,
}

/// Insert `records` into `table` as one batch, then derive loss time
///
/// An empty batch touches nothing. A failed derivation is logged and does
/// not undo the committed insert.
pub async fn write_batch(
    store: &dyn ProductionStore,
    table: &TableName,
    records: &[ProductionRecord],
) -> IngestResult<WriteOutcome> {
    if records.is_empty() {
        return Ok(WriteOutcome::default());
    }

    let inserted = store.insert_records(table, records).await?;

    let loss_recorded = match derive_loss_time(store, table).await {
        Ok(recorded) => recorded,
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "Loss time derivation failed");
            false
        }
    };

    Ok(WriteOutcome {
        inserted,
        loss_recorded,
    })
}
