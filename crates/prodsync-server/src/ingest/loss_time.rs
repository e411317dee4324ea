//! Loss-time derivation
//!
//! After a line's rows are committed, the two newest rows of its table are
//! compared. Wall-clock time between them beyond the newer row's standard
//! unit time (sut) is recorded as idle time for that machine.

use crate::db::{ProductionStore, TableName};
use crate::error::IngestResult;

use super::models::{LossTimeEntry, StoredRecord};

/// Build the loss entry for two consecutive rows, if there was idle time
///
/// `current` is the newer row. Returns `None` when the elapsed time does not
/// exceed the newer row's unit time.
pub fn compute_loss(
    machine: &TableName,
    current: &StoredRecord,
    previous: &StoredRecord,
) -> Option<LossTimeEntry> {
    let elapsed = current.date_time - previous.date_time;
    let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
    let net_loss = elapsed_secs - f64::from(current.sut);

    if net_loss <= 0.0 {
        return None;
    }

    Some(LossTimeEntry {
        date: current.date_time.date(),
        machine: machine.to_string(),
        time: previous.date_time.time(),
        loss_seconds: net_loss.trunc() as i32,
        end_time: current.date_time,
    })
}

/// Derive and store the loss entry for the newest pair of rows in `table`
///
/// Returns whether an entry was written. Re-running without new rows finds
/// the existing entry and writes nothing.
#[tracing::instrument(skip(store, table), fields(table = %table))]
pub async fn derive_loss_time(store: &dyn ProductionStore, table: &TableName) -> IngestResult<bool> {
    let latest = store.latest_two(table).await?;
    let [current, previous] = latest.as_slice() else {
        tracing::debug!(rows = latest.len(), "Not enough rows to derive loss time");
        return Ok(false);
    };

    let Some(entry) = compute_loss(table, current, previous) else {
        return Ok(false);
    };

    if store.loss_time_exists(&entry).await? {
        tracing::debug!(end_time = %entry.end_time, "Loss time already recorded");
        return Ok(false);
    }

    match store.insert_loss_time(&entry).await {
        Ok(()) => {
            tracing::info!(
                end_time = %entry.end_time,
                loss_seconds = entry.loss_seconds,
                "Recorded loss time"
            );
            Ok(true)
        }
        // Another writer won the race on (machine, end_time).
        Err(e) if e.is_unique_violation() => Ok(false),
        Err(e) => Err(e),
    }
}
