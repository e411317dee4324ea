//! Collector error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors raised while polling, storing or archiving production data
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid table name: '{0}'")]
    InvalidTableName(String),

    #[error("Store error: {0}")]
    Store(String),

    /// A unique key was already taken, reported by a non-SQL store
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error(transparent)]
    Common(#[from] prodsync_common::ProdsyncError),
}

impl IngestError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the write lost against an existing unique key
    pub fn is_unique_violation(&self) -> bool {
        match self {
            IngestError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            IngestError::DuplicateKey(_) => true,
            _ => false,
        }
    }
}
