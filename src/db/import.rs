//! Bulk append of records coming from a backup archive.
//!
//! Every record is validated and inserted on its own. A bad record is skipped
//! and counted; it never aborts the records around it. Archive ids belong to
//! another device's id space, so they are discarded and the store assigns new ones.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

use super::error::DataResult;
use super::journal::insert_entry;
use super::logs::insert_log;
use super::types::{NewJournalEntry, NewLog};
use super::Database;

/// Parsed archive documents, one JSON value per record.
#[derive(Debug, Clone, Default)]
pub struct ImportBundle {
  pub logs: Vec<Value>,
  pub journal: Vec<Value>,
}

impl ImportBundle {
  pub fn len(&self) -> usize {
    self.logs.len() + self.journal.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub logs_imported: usize,
  pub journal_imported: usize,
  pub skipped: usize,
}

impl ImportSummary {
  pub fn imported(&self) -> usize {
    self.logs_imported + self.journal_imported
  }

  pub fn total(&self) -> usize {
    self.imported() + self.skipped
  }
}

impl fmt::Display for ImportSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} of {} records imported ({} logs, {} journal entries); {} skipped",
      self.imported(),
      self.total(),
      self.logs_imported,
      self.journal_imported,
      self.skipped
    )
  }
}

#[derive(Deserialize)]
struct ArchivedLog {
  #[serde(flatten)]
  record: NewLog,
  timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ArchivedJournalEntry {
  #[serde(flatten)]
  record: NewJournalEntry,
  timestamp: DateTime<Utc>,
}

fn parse_log(value: Value) -> Result<(NewLog, DateTime<Utc>), String> {
  let archived: ArchivedLog = serde_json::from_value(value).map_err(|e| e.to_string())?;
  archived.record.validate().map_err(|e| e.to_string())?;
  Ok((archived.record, archived.timestamp.trunc_subsecs(3)))
}

fn parse_entry(value: Value) -> Result<(NewJournalEntry, DateTime<Utc>), String> {
  let archived: ArchivedJournalEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
  archived.record.validate().map_err(|e| e.to_string())?;
  Ok((archived.record, archived.timestamp.trunc_subsecs(3)))
}

impl Database {
  /// Append every record in `bundle` as a new entry, keeping its original timestamp.
  pub fn import_data(&self, bundle: ImportBundle) -> DataResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    if bundle.is_empty() {
      return Ok(summary);
    }
    info!(records = bundle.len(), "importing records");
    let conn = self.conn()?;

    for (index, value) in bundle.logs.into_iter().enumerate() {
      let inserted = parse_log(value)
        .and_then(|(log, ts)| insert_log(&conn, &log, &ts).map_err(|e| e.to_string()));
      match inserted {
        Ok(_) => summary.logs_imported += 1,
        Err(reason) => {
          warn!(index, %reason, "skipping log from archive");
          summary.skipped += 1;
        }
      }
    }

    for (index, value) in bundle.journal.into_iter().enumerate() {
      let inserted = parse_entry(value)
        .and_then(|(entry, ts)| insert_entry(&conn, &entry, &ts).map_err(|e| e.to_string()));
      match inserted {
        Ok(_) => summary.journal_imported += 1,
        Err(reason) => {
          warn!(index, %reason, "skipping journal entry from archive");
          summary.skipped += 1;
        }
      }
    }

    info!(
      logs = summary.logs_imported,
      journal = summary.journal_imported,
      skipped = summary.skipped,
      "import finished"
    );
    Ok(summary)
  }
}
