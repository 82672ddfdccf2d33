//! Versioned schema for the local store, tracked with `PRAGMA user_version`.
//!
//! Every step is additive. A step and its version bump commit together, so an
//! interrupted upgrade resumes at the first step that did not commit.

use rusqlite::Connection;
use tracing::info;

use super::error::{DataError, DataResult};

pub const CURRENT_VERSION: u32 = 3;

struct Migration {
  version: u32,
  description: &'static str,
  sql: &'static str,
}

const V1_COLLECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    intensity INTEGER NOT NULL,
    description TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);

CREATE TABLE IF NOT EXISTS journal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_journal_timestamp ON journal(timestamp);
"#;

// Journal rows are kept; only the index definition is rebuilt.
const V2_JOURNAL_REFLECTION: &str = r#"
ALTER TABLE journal ADD COLUMN intensity INTEGER;
ALTER TABLE journal ADD COLUMN trigger_note TEXT;
ALTER TABLE journal ADD COLUMN evidence_for TEXT;
ALTER TABLE journal ADD COLUMN evidence_against TEXT;
ALTER TABLE journal ADD COLUMN alternative_view TEXT;
ALTER TABLE journal ADD COLUMN schema_link TEXT;

DROP INDEX IF EXISTS idx_journal_timestamp;
CREATE INDEX idx_journal_timestamp ON journal(timestamp);
"#;

const V3_LOG_EMOTIONS: &str = r#"
ALTER TABLE logs ADD COLUMN emotion TEXT;
ALTER TABLE logs ADD COLUMN emotion_path TEXT;
"#;

const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    description: "logs and journal collections",
    sql: V1_COLLECTIONS,
  },
  Migration {
    version: 2,
    description: "journal intensity and reflection fields",
    sql: V2_JOURNAL_REFLECTION,
  },
  Migration {
    version: 3,
    description: "log emotion selection",
    sql: V3_LOG_EMOTIONS,
  },
];

/// Bring the schema up to `CURRENT_VERSION`. Returns the version in place afterwards.
pub fn run_migrations(conn: &Connection) -> DataResult<u32> {
  migrate_to(conn, CURRENT_VERSION)
}

/// Apply every pending step up to and including `target`, in order.
pub(crate) fn migrate_to(conn: &Connection, target: u32) -> DataResult<u32> {
  let current = current_version(conn)?;
  if current > CURRENT_VERSION {
    return Err(DataError::UnsupportedVersion {
      found: current,
      supported: CURRENT_VERSION,
    });
  }

  for migration in MIGRATIONS
    .iter()
    .filter(|m| m.version > current && m.version <= target)
  {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)
      .map_err(|source| DataError::MigrationFailed {
        version: migration.version,
        source,
      })?;
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;
    info!(
      version = migration.version,
      description = migration.description,
      "applied migration"
    );
  }

  current_version(conn)
}

pub fn current_version(conn: &Connection) -> DataResult<u32> {
  let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
  Ok(version)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
      .prepare(&format!("PRAGMA table_info({})", table))
      .unwrap();
    stmt
      .query_map([], |row| row.get::<_, String>(1))
      .unwrap()
      .map(|r| r.unwrap())
      .collect()
  }

  #[test]
  fn test_fresh_database_reaches_current_version() {
    let conn = Connection::open_in_memory().unwrap();
    assert_eq!(run_migrations(&conn).unwrap(), CURRENT_VERSION);
    assert!(columns(&conn, "logs").contains(&"emotion_path".to_string()));
    assert!(columns(&conn, "journal").contains(&"schema_link".to_string()));
  }

  #[test]
  fn test_migrations_apply_once() {
    let conn = Connection::open_in_memory().unwrap();
    run_migrations(&conn).unwrap();
    // A second run must not try to re-add columns.
    assert_eq!(run_migrations(&conn).unwrap(), CURRENT_VERSION);
  }

  #[test]
  fn test_upgrade_from_v1_keeps_journal_rows() {
    let conn = Connection::open_in_memory().unwrap();
    assert_eq!(migrate_to(&conn, 1).unwrap(), 1);
    conn
      .execute(
        "INSERT INTO journal (title, content, timestamp) VALUES ('Old', 'Kept', '2023-01-01T00:00:00.000Z')",
        [],
      )
      .unwrap();
    conn
      .execute(
        "INSERT INTO logs (category, intensity, timestamp) VALUES ('Compulsion', 4, '2023-01-01T00:00:00.000Z')",
        [],
      )
      .unwrap();

    run_migrations(&conn).unwrap();

    let (title, intensity): (String, Option<u8>) = conn
      .query_row("SELECT title, intensity FROM journal", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .unwrap();
    assert_eq!(title, "Old");
    assert_eq!(intensity, None);

    let logs: i64 = conn
      .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
      .unwrap();
    assert_eq!(logs, 1);
  }

  #[test]
  fn test_newer_database_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    conn
      .pragma_update(None, "user_version", CURRENT_VERSION + 1)
      .unwrap();
    assert!(matches!(
      run_migrations(&conn),
      Err(DataError::UnsupportedVersion { .. })
    ));
  }
}
