//! Prodsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error type and logging setup for the prodsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ProdsyncError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use prodsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("collector starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ProdsyncError, Result};
