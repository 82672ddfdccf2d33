pub mod error;
mod import;
mod journal;
mod logs;
pub mod schema;
pub mod types;

pub use error::{DataError, DataResult};
pub use import::{ImportBundle, ImportSummary};
pub use types::{Category, JournalEntry, JournalPatch, Log, LogPatch, NewJournalEntry, NewLog};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::info;

/// File name of the record database inside the data directory
pub const DATABASE_FILE: &str = "mindful-track.db";

/// Local store holding logs and journal entries.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`, applying pending migrations.
  pub fn open(path: &Path) -> DataResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        DataError::StorageUnavailable(format!(
          "failed to create data directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    Self::init(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> DataResult<Self> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(conn: Connection) -> DataResult<Self> {
    conn.execute_batch(
      "
      PRAGMA journal_mode = WAL;
      PRAGMA synchronous = NORMAL;
      PRAGMA busy_timeout = 5000;
      ",
    )?;
    let version = schema::run_migrations(&conn)?;
    info!(version, "database ready");

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database location inside the user's data directory.
  pub fn default_path() -> DataResult<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE))
  }

  pub(crate) fn conn(&self) -> DataResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| DataError::LockPoisoned)
  }

  /// Remove every log and journal entry. Ids keep counting up afterwards.
  pub fn clear_all(&self) -> DataResult<(usize, usize)> {
    let conn = self.conn()?;
    let tx = conn.unchecked_transaction()?;
    let logs = tx.execute("DELETE FROM logs", [])?;
    let journal = tx.execute("DELETE FROM journal", [])?;
    tx.commit()?;
    info!(logs, journal, "cleared all data");
    Ok((logs, journal))
  }
}

/// Data directory for the database, cache and log file.
///
/// There is nowhere to persist anything when neither a data directory nor a
/// home directory can be resolved.
pub fn default_data_dir() -> DataResult<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|dir| dir.join("mindful-track"))
    .ok_or_else(|| DataError::StorageUnavailable("could not determine data directory".to_string()))
}

#[derive(Debug, Clone)]
enum Location {
  Default,
  Path(PathBuf),
  #[cfg(test)]
  Memory,
}

/// Lazily opened, shared database handle.
///
/// Concurrent first callers wait on the same open. A failed open leaves the
/// handle unopened so the next call tries again.
#[derive(Clone)]
pub struct LazyDatabase {
  location: Location,
  cell: Arc<OnceCell<Arc<Database>>>,
}

impl LazyDatabase {
  /// Open at `path`, or at the default location when `None`.
  pub fn new(path: Option<PathBuf>) -> Self {
    let location = match path {
      Some(path) => Location::Path(path),
      None => Location::Default,
    };
    Self {
      location,
      cell: Arc::new(OnceCell::new()),
    }
  }

  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self {
      location: Location::Memory,
      cell: Arc::new(OnceCell::new()),
    }
  }

  pub async fn get(&self) -> DataResult<Arc<Database>> {
    self
      .cell
      .get_or_try_init(|| async {
        let db = match &self.location {
          Location::Default => Database::open(&Database::default_path()?)?,
          Location::Path(path) => Database::open(path)?,
          #[cfg(test)]
          Location::Memory => Database::open_in_memory()?,
        };
        Ok::<_, DataError>(Arc::new(db))
      })
      .await
      .map(Arc::clone)
  }
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
  Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 so that text order matches time order.
pub(crate) fn to_db_time(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| {
      rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_db_time_is_sortable() {
    let early: DateTime<Utc> = "2024-01-01T09:00:00.5Z".parse().unwrap();
    let late: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
    assert_eq!(to_db_time(&early), "2024-01-01T09:00:00.500Z");
    assert!(to_db_time(&early) < to_db_time(&late));
    assert_eq!(from_db_time(&to_db_time(&early)).unwrap(), early);
  }

  #[test]
  fn test_open_on_disk_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join(DATABASE_FILE);

    let db = Database::open(&path).unwrap();
    db.add_log(NewLog::new(Category::Accomplished, 6)).unwrap();
    drop(db);

    let db = Database::open(&path).unwrap();
    assert_eq!(
      schema::current_version(&db.conn().unwrap()).unwrap(),
      schema::CURRENT_VERSION
    );
    assert_eq!(db.get_logs().unwrap().len(), 1);
  }

  #[test]
  fn test_clear_all_does_not_reuse_ids() {
    let db = Database::open_in_memory().unwrap();
    let first = db.add_log(NewLog::new(Category::Compulsion, 3)).unwrap();
    db.add_journal_entry(NewJournalEntry::new("A", "B")).unwrap();

    assert_eq!(db.clear_all().unwrap(), (1, 1));
    assert!(db.get_logs().unwrap().is_empty());

    let second = db.add_log(NewLog::new(Category::Compulsion, 3)).unwrap();
    assert!(second.id > first.id);
  }

  #[tokio::test]
  async fn test_lazy_database_shares_one_connection() {
    let lazy = LazyDatabase::in_memory();
    assert!(!lazy.cell.initialized());

    let (a, b) = tokio::join!(lazy.get(), lazy.get());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(lazy.cell.initialized());

    let c = lazy.clone().get().await.unwrap();
    assert!(Arc::ptr_eq(&a, &c));
  }

  #[tokio::test]
  async fn test_lazy_database_retries_after_failed_open() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let lazy = LazyDatabase::new(Some(blocker.join(DATABASE_FILE)));
    assert!(matches!(
      lazy.get().await,
      Err(DataError::StorageUnavailable(_))
    ));
    assert!(!lazy.cell.initialized());

    std::fs::remove_file(&blocker).unwrap();
    assert!(lazy.get().await.is_ok());
  }
}
