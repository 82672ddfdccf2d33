//! Error taxonomy for the local store.

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum DataError {
  /// No place to keep the database. Callers defer reads and writes instead of retrying.
  #[error("Data unavailable: {0}")]
  StorageUnavailable(String),

  #[error("{collection} record {id} not found")]
  NotFound { collection: &'static str, id: i64 },

  #[error("Invalid range: start {start} is after end {end}")]
  InvalidRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  },

  #[error("Invalid {field}: {message}")]
  Validation {
    field: &'static str,
    message: String,
  },

  #[error("Database schema version {found} is newer than supported version {supported}")]
  UnsupportedVersion { found: u32, supported: u32 },

  #[error("Migration to version {version} failed: {source}")]
  MigrationFailed {
    version: u32,
    #[source]
    source: rusqlite::Error,
  },

  #[error("Database lock poisoned")]
  LockPoisoned,

  #[error("Database error: {0}")]
  Sqlite(#[from] rusqlite::Error),
}

pub type DataResult<T> = std::result::Result<T, DataError>;
