//! Prodsync Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Collects production counts written by assembly-line PCs into text files
//! on network shares and stores them in PostgreSQL.
//!
//! # Overview
//!
//! - **Configuration**: figment layering of defaults, TOML and environment
//! - **Database**: the [`db::ProductionStore`] boundary and its PostgreSQL
//!   implementation
//! - **Ingestion**: the poll scheduler and per-line pipeline in [`ingest`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prodsync_server::{config::Config, db, ingest::{LocalFs, Scheduler}};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = db::PgStore::new(pool, config.monitor.loss_time_table.clone());
//!     let scheduler = Scheduler::new(config.monitor, Arc::new(store), Arc::new(LocalFs::new()));
//!     scheduler.start(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;

// Re-export commonly used types
pub use error::{IngestError, IngestResult};
