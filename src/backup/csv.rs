//! Flat CSV export of logs for spreadsheets.

use chrono::{NaiveDate, SecondsFormat};
use std::path::{Path, PathBuf};

use super::{BackupError, BackupResult};
use crate::db::{Database, Log};

const HEADER: &str = "ID,Timestamp,Category,Intensity,Description";

pub fn csv_file_name(date: NaiveDate) -> String {
  format!("mindful-track-logs-{}.csv", date.format("%Y-%m-%d"))
}

/// One row per log. The description is always quoted, with inner quotes doubled.
pub fn logs_to_csv(logs: &[Log]) -> String {
  let mut out = String::from(HEADER);
  out.push('\n');
  for log in logs {
    let description = log.description.as_deref().unwrap_or_default().replace('"', "\"\"");
    out.push_str(&format!(
      "{},{},{},{},\"{}\"\n",
      log.id,
      log.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
      log.category,
      log.intensity,
      description
    ));
  }
  out
}

pub fn export_csv(db: &Database, dir: &Path, date: NaiveDate) -> BackupResult<PathBuf> {
  let logs = db.get_logs()?;
  if logs.is_empty() {
    return Err(BackupError::NoData);
  }
  std::fs::create_dir_all(dir)?;
  let path = dir.join(csv_file_name(date));
  std::fs::write(&path, logs_to_csv(&logs))?;
  Ok(path)
}
