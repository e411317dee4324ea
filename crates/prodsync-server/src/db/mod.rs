//! Store boundary
//!
//! [`ProductionStore`] is everything the pipeline needs from the destination
//! store. [`PgStore`] talks to PostgreSQL; [`MemoryStore`] keeps rows in
//! process and backs the pipeline tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::{DatabaseConfig, DEFAULT_LOSS_TIME_TABLE};
use crate::error::{IngestError, IngestResult};
use crate::ingest::models::{DedupKey, LossTimeEntry, ProductionRecord, StoredRecord};

#[allow(clippy::expect_used)]
static TABLE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table name pattern is valid")
});

/// A table name that is safe to interpolate into SQL
///
/// Destination tables are chosen per line in configuration, so they cannot be
/// bound as query parameters. Only plain identifiers, optionally
/// schema-qualified, are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> IngestResult<Self> {
        let name = name.into();
        if TABLE_NAME_PATTERN.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(IngestError::InvalidTableName(name))
        }
    }

    pub(crate) fn loss_time_default() -> Self {
        Self(DEFAULT_LOSS_TIME_TABLE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text, e.g. `"prod"."line_a"`
    pub fn quoted(&self) -> String {
        self.0
            .split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl TryFrom<String> for TableName {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operations the ingestion pipeline performs against the destination store
#[async_trait]
pub trait ProductionStore: Send + Sync {
    /// Whether a row matching `key` already exists in `table`
    async fn record_exists(&self, table: &TableName, key: &DedupKey) -> IngestResult<bool>;

    /// Insert all records in one transaction, preserving order
    async fn insert_records(
        &self,
        table: &TableName,
        records: &[ProductionRecord],
    ) -> IngestResult<u64>;

    /// The two rows with the highest insertion sequence, newest first
    async fn latest_two(&self, table: &TableName) -> IngestResult<Vec<StoredRecord>>;

    /// Whether a loss-time entry exists for `(machine, end_time)`
    async fn loss_time_exists(&self, entry: &LossTimeEntry) -> IngestResult<bool>;

    /// Append one loss-time entry
    async fn insert_loss_time(&self, entry: &LossTimeEntry) -> IngestResult<()>;
}

pub async fn create_pool(config: &DatabaseConfig) -> IngestResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> IngestResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(IngestError::from)
}
