//! Production data ingestion
//!
//! # Architecture
//!
//! - **scheduler**: poll loop, one task per line per cycle
//! - **poller**: one line's files through parse, dedup, insert and archive
//! - **tracker**: new/updated detection against the archive folder
//! - **parser**: comma-separated line files into [`ProductionRecord`]s
//! - **dedup**: duplicate suppression by serial number or value tuple
//! - **writer**: batch insert followed by loss-time derivation
//! - **loss_time**: idle time between the two newest rows of a line
//! - **fs**: filesystem seam over the line shares

pub mod dedup;
pub mod fs;
pub mod loss_time;
pub mod models;
pub mod parser;
pub mod poller;
pub mod scheduler;
pub mod tracker;
pub mod writer;

pub use fs::{LocalFs, SourceFs};
pub use models::{DedupKey, LossTimeEntry, ProductionRecord, SourceFile, StoredRecord};
pub use poller::{FileOutcome, FileStats, LinePoller, LineReport, LineStatus};
pub use scheduler::Scheduler;
pub use tracker::{Decision, FileTracker};
