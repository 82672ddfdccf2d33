//! Portable backups: a zip archive holding `logs.json` and `journal.json`.
//!
//! Import is all-or-nothing while parsing: any unreadable document aborts
//! before the store is touched. Once parsed, records are appended one by one
//! (see `Database::import_data`).

mod csv;

pub use csv::export_csv;

use chrono::NaiveDate;
use serde_json::Value;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::{DataError, Database, ImportBundle, ImportSummary};

pub const LOGS_FILE: &str = "logs.json";
pub const JOURNAL_FILE: &str = "journal.json";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
  /// Nothing to export. A notice for the user rather than a failure.
  #[error("No data to export")]
  NoData,

  #[error("Invalid archive: {0}")]
  InvalidArchive(String),

  #[error("Malformed {file}: {reason}")]
  MalformedData { file: &'static str, reason: String },

  #[error("Failed to write archive: {0}")]
  Write(#[from] ZipError),

  #[error("Failed to encode {file}: {source}")]
  Encode {
    file: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Data(#[from] DataError),
}

pub type BackupResult<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
  pub logs: usize,
  pub journal: usize,
}

/// `mindful-track-backup-YYYY-MM-DD.zip`
pub fn archive_file_name(date: NaiveDate) -> String {
  format!("mindful-track-backup-{}.zip", date.format("%Y-%m-%d"))
}

/// Write both collections into a zip archive.
pub fn write_archive<W: Write + Seek>(db: &Database, writer: W) -> BackupResult<ExportSummary> {
  let logs = db.get_logs()?;
  let journal = db.get_journal_entries()?;
  if logs.is_empty() && journal.is_empty() {
    return Err(BackupError::NoData);
  }

  let logs_json = serde_json::to_vec_pretty(&logs).map_err(|source| BackupError::Encode {
    file: LOGS_FILE,
    source,
  })?;
  let journal_json = serde_json::to_vec_pretty(&journal).map_err(|source| BackupError::Encode {
    file: JOURNAL_FILE,
    source,
  })?;

  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
  let mut zip = ZipWriter::new(writer);
  zip.start_file(LOGS_FILE, options)?;
  zip.write_all(&logs_json)?;
  zip.start_file(JOURNAL_FILE, options)?;
  zip.write_all(&journal_json)?;
  zip.finish()?;

  Ok(ExportSummary {
    logs: logs.len(),
    journal: journal.len(),
  })
}

/// Export into `dir` under the dated archive name. No file is created when
/// there is nothing to export.
pub fn export_to_dir(
  db: &Database,
  dir: &Path,
  date: NaiveDate,
) -> BackupResult<(PathBuf, ExportSummary)> {
  let mut buffer = Cursor::new(Vec::new());
  let summary = write_archive(db, &mut buffer)?;

  std::fs::create_dir_all(dir)?;
  let path = dir.join(archive_file_name(date));
  std::fs::write(&path, buffer.into_inner())?;

  info!(path = %path.display(), logs = summary.logs, journal = summary.journal, "exported backup");
  Ok((path, summary))
}

/// Parse an archive into an import bundle without touching the store.
pub fn read_archive<R: Read + Seek>(reader: R) -> BackupResult<ImportBundle> {
  let mut archive = ZipArchive::new(reader).map_err(|e| BackupError::InvalidArchive(e.to_string()))?;

  let logs = read_document(&mut archive, LOGS_FILE)?;
  let journal = read_document(&mut archive, JOURNAL_FILE)?;
  if logs.is_none() && journal.is_none() {
    return Err(BackupError::InvalidArchive(format!(
      "archive must contain {} or {}",
      LOGS_FILE, JOURNAL_FILE
    )));
  }

  Ok(ImportBundle {
    logs: logs.unwrap_or_default(),
    journal: journal.unwrap_or_default(),
  })
}

fn read_document<R: Read + Seek>(
  archive: &mut ZipArchive<R>,
  name: &'static str,
) -> BackupResult<Option<Vec<Value>>> {
  let mut file = match archive.by_name(name) {
    Ok(file) => file,
    Err(ZipError::FileNotFound) => return Ok(None),
    Err(e) => return Err(BackupError::InvalidArchive(format!("{}: {}", name, e))),
  };

  let mut contents = Vec::new();
  file
    .read_to_end(&mut contents)
    .map_err(|e| BackupError::InvalidArchive(format!("{}: {}", name, e)))?;

  let value: Value = serde_json::from_slice(&contents).map_err(|e| BackupError::MalformedData {
    file: name,
    reason: e.to_string(),
  })?;

  match value {
    Value::Array(records) => Ok(Some(records)),
    other => Err(BackupError::MalformedData {
      file: name,
      reason: format!("expected a JSON array, found {}", json_kind(&other)),
    }),
  }
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

/// Parse an archive and append its records to the store.
pub fn import_archive<R: Read + Seek>(db: &Database, reader: R) -> BackupResult<ImportSummary> {
  let bundle = read_archive(reader)?;
  let summary = db.import_data(bundle)?;
  Ok(summary)
}

pub fn import_from_path(db: &Database, path: &Path) -> BackupResult<ImportSummary> {
  let file = File::open(path)?;
  let summary = import_archive(db, file)?;
  info!(path = %path.display(), %summary, "imported backup");
  Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::db::{Category, NewJournalEntry, NewLog};
  use chrono::{DateTime, Utc};
  use std::collections::BTreeSet;

  /// Build a zip in memory from (name, contents) pairs.
  pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
      let mut zip = ZipWriter::new(&mut buffer);
      for (name, contents) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
      }
      zip.finish().unwrap();
    }
    buffer.into_inner()
  }

  fn seeded() -> Database {
    let db = Database::open_in_memory().unwrap();
    for (intensity, ts) in [
      (3, "2024-04-01T09:00:00Z"),
      (9, "2024-04-02T09:00:00Z"),
      (5, "2024-04-03T09:00:00Z"),
    ] {
      let log = NewLog::new(Category::IntrusiveThought, intensity).with_description("said \"no\"");
      db.insert_log_at(&log, ts.parse().unwrap()).unwrap();
    }
    let mut entry = NewJournalEntry::new("Reflection", "Long text");
    entry.alternative_view = Some("Thoughts are not facts".to_string());
    db.add_journal_entry(entry).unwrap();
    db
  }

  fn export_bytes(db: &Database) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    write_archive(db, &mut buffer).unwrap();
    buffer.into_inner()
  }

  type LogFields = (Category, u8, Option<String>, DateTime<Utc>);

  fn log_fields(db: &Database) -> BTreeSet<String> {
    db.get_logs()
      .unwrap()
      .into_iter()
      .map(|l| {
        let fields: LogFields = (l.category, l.intensity, l.description, l.timestamp);
        format!("{:?}", fields)
      })
      .collect()
  }

  #[test]
  fn test_archive_name_embeds_date() {
    let date = NaiveDate::from_ymd_opt(2024, 7, 9).unwrap();
    assert_eq!(archive_file_name(date), "mindful-track-backup-2024-07-09.zip");
  }

  #[test]
  fn test_export_empty_store_is_no_data() {
    let db = Database::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 7, 9).unwrap();

    assert!(matches!(
      export_to_dir(&db, dir.path(), date),
      Err(BackupError::NoData)
    ));
    assert!(!dir.path().join(archive_file_name(date)).exists());
  }

  #[test]
  fn test_export_contains_both_documents() {
    let db = seeded();
    let bytes = export_bytes(&db);
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

    let mut logs = String::new();
    archive
      .by_name(LOGS_FILE)
      .unwrap()
      .read_to_string(&mut logs)
      .unwrap();
    let logs: Value = serde_json::from_str(&logs).unwrap();
    assert_eq!(logs.as_array().unwrap().len(), 3);
    assert_eq!(logs[0]["category"], "Intrusive Thought");
    assert_eq!(logs[0]["timestamp"], "2024-04-03T09:00:00Z");
    assert!(archive.by_name(JOURNAL_FILE).is_ok());
  }

  #[test]
  fn test_round_trip_into_empty_store() {
    let source = seeded();
    let bytes = export_bytes(&source);

    let target = Database::open_in_memory().unwrap();
    let summary = import_archive(&target, Cursor::new(bytes)).unwrap();
    assert_eq!(summary.logs_imported, 3);
    assert_eq!(summary.journal_imported, 1);
    assert_eq!(summary.skipped, 0);

    assert_eq!(log_fields(&source), log_fields(&target));

    let original = &source.get_journal_entries().unwrap()[0];
    let restored = &target.get_journal_entries().unwrap()[0];
    assert_eq!(restored.title, original.title);
    assert_eq!(restored.content, original.content);
    assert_eq!(restored.alternative_view, original.alternative_view);
    assert_eq!(restored.timestamp, original.timestamp);
  }

  #[test]
  fn test_import_into_populated_store_is_a_union() {
    let db = seeded();
    let bytes = export_bytes(&db);
    import_archive(&db, Cursor::new(bytes)).unwrap();
    assert_eq!(db.get_logs().unwrap().len(), 6);
    assert_eq!(db.get_journal_entries().unwrap().len(), 2);
  }

  #[test]
  fn test_garbage_is_invalid_archive() {
    let db = Database::open_in_memory().unwrap();
    let result = import_archive(&db, Cursor::new(b"definitely not a zip".to_vec()));
    assert!(matches!(result, Err(BackupError::InvalidArchive(_))));
  }

  #[test]
  fn test_archive_without_known_documents_is_invalid() {
    let bytes = zip_bytes(&[("notes.txt", "hello")]);
    let err = read_archive(Cursor::new(bytes)).unwrap_err();
    match err {
      BackupError::InvalidArchive(reason) => {
        assert!(reason.contains("must contain logs.json or journal.json"))
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn test_unparsable_logs_leave_store_unchanged() {
    let db = seeded();
    let before_logs = db.get_logs().unwrap();
    let before_journal = db.get_journal_entries().unwrap();

    let bytes = zip_bytes(&[
      (JOURNAL_FILE, r#"[{"title":"New","content":"x","timestamp":"2024-01-01T00:00:00Z"}]"#),
      (LOGS_FILE, "{ not json"),
    ]);
    let result = import_archive(&db, Cursor::new(bytes));
    assert!(matches!(
      result,
      Err(BackupError::MalformedData {
        file: LOGS_FILE,
        ..
      })
    ));

    assert_eq!(db.get_logs().unwrap(), before_logs);
    assert_eq!(db.get_journal_entries().unwrap(), before_journal);
  }

  #[test]
  fn test_non_array_document_is_malformed() {
    let bytes = zip_bytes(&[(LOGS_FILE, r#"{"logs": []}"#)]);
    assert!(matches!(
      read_archive(Cursor::new(bytes)),
      Err(BackupError::MalformedData { .. })
    ));
  }

  #[test]
  fn test_journal_only_archive() {
    let db = seeded();
    let logs_before = db.get_logs().unwrap().len();

    let bytes = zip_bytes(&[(
      JOURNAL_FILE,
      r#"[{"id": 12, "title": "Test", "content": "Imported entry", "timestamp": "2024-02-02T10:00:00.000Z"}]"#,
    )]);
    let summary = import_archive(&db, Cursor::new(bytes)).unwrap();

    assert_eq!(summary.journal_imported, 1);
    assert_eq!(summary.logs_imported, 0);
    assert_eq!(db.get_logs().unwrap().len(), logs_before);
    let titled: Vec<_> = db
      .get_journal_entries()
      .unwrap()
      .into_iter()
      .filter(|e| e.title == "Test")
      .collect();
    assert_eq!(titled.len(), 1);
  }

  #[test]
  fn test_export_to_dir_then_import_from_path() {
    let db = seeded();
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 4, 4).unwrap();
    let (path, summary) = export_to_dir(&db, dir.path(), date).unwrap();
    assert_eq!(summary, ExportSummary { logs: 3, journal: 1 });
    assert!(path.ends_with("mindful-track-backup-2024-04-04.zip"));

    let fresh = Database::open_in_memory().unwrap();
    let imported = import_from_path(&fresh, &path).unwrap();
    assert_eq!(imported.imported(), 4);

    let mut intensities: Vec<u8> = fresh.get_logs().unwrap().iter().map(|l| l.intensity).collect();
    intensities.sort();
    assert_eq!(intensities, vec![3, 5, 9]);
  }
}
