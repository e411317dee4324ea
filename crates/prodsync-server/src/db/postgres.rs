//! PostgreSQL store
//!
//! Table names are validated [`TableName`]s and rendered quoted; every value
//! is a bound parameter.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{ProductionStore, TableName};
use crate::error::IngestResult;
use crate::ingest::models::{DedupKey, LossTimeEntry, ProductionRecord, StoredRecord};

/// Rows per INSERT statement; keeps a statement well under the
/// 65535 bind-parameter limit (9 parameters per row).
const INSERT_CHUNK_ROWS: usize = 1000;

/// [`ProductionStore`] backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    loss_time_table: TableName,
}

impl PgStore {
    pub fn new(pool: PgPool, loss_time_table: TableName) -> Self {
        Self {
            pool,
            loss_time_table,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Earliest `date_time` a row of a file dated `date` can carry
fn file_window_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

#[async_trait]
impl ProductionStore for PgStore {
    async fn record_exists(&self, table: &TableName, key: &DedupKey) -> IngestResult<bool> {
        let exists = match key {
            DedupKey::Serial(serial) => {
                let sql = format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE serial_number = $1)",
                    table.quoted()
                );
                sqlx::query_scalar::<_, bool>(&sql)
                    .bind(serial.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            DedupKey::Tuple {
                date,
                model,
                target,
                actual,
                sut,
            } => {
                // Rows are stamped when accepted, which is never before the
                // file's own date.
                let sql = format!(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM {}
                        WHERE date_time >= $1
                          AND model = $2 AND target = $3 AND actual = $4 AND sut = $5
                    )
                    "#,
                    table.quoted()
                );
                sqlx::query_scalar::<_, bool>(&sql)
                    .bind(file_window_start(*date))
                    .bind(model.as_str())
                    .bind(*target)
                    .bind(*actual)
                    .bind(*sut)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(exists)
    }

    async fn insert_records(
        &self,
        table: &TableName,
        records: &[ProductionRecord],
    ) -> IngestResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (date_time, model, daily_plan, target, actual, weight, efficiency, serial_number, sut) ",
                table.quoted()
            ));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.date_time)
                    .push_bind(record.model.clone())
                    .push_bind(record.daily_plan)
                    .push_bind(record.target)
                    .push_bind(record.actual)
                    .push_bind(record.weight.clone())
                    .push_bind(record.efficiency.clone())
                    .push_bind(record.serial_number.clone())
                    .push_bind(record.sut);
            });

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn latest_two(&self, table: &TableName) -> IngestResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT id, date_time, sut FROM {} ORDER BY id DESC LIMIT 2",
            table.quoted()
        );
        let rows = sqlx::query_as::<_, StoredRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn loss_time_exists(&self, entry: &LossTimeEntry) -> IngestResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE machine = $1 AND end_time = $2)",
            self.loss_time_table.quoted()
        );
        let exists = sqlx::query_scalar::<_, bool>(&sql)
            .bind(&entry.machine)
            .bind(entry.end_time)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_loss_time(&self, entry: &LossTimeEntry) -> IngestResult<()> {
        let sql = format!(
            r#"INSERT INTO {} ("date", machine, "time", loss_seconds, end_time) VALUES ($1, $2, $3, $4, $5)"#,
            self.loss_time_table.quoted()
        );
        sqlx::query(&sql)
            .bind(entry.date)
            .bind(&entry.machine)
            .bind(entry.time)
            .bind(entry.loss_seconds)
            .bind(entry.end_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
