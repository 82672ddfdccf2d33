//! Application state container.
//!
//! Holds the in-memory views of both collections that commands read from.
//! The store stays the source of truth: every write goes through here and
//! drops the affected view, and an import reloads everything.
//!
//! # Example
//!
//! ```ignore
//! let mut state = AppState::new(LazyDatabase::new(None));
//! state.add_log(NewLog::new(Category::Accomplished, 6)).await?;
//! let recent = state.logs().await?; // reloaded, newest first
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backup::{self, BackupResult};
use crate::db::{
  Category, DataResult, Database, ImportSummary, JournalEntry, JournalPatch, LazyDatabase, Log,
  LogPatch, NewJournalEntry, NewLog,
};

/// Intensity given to a reflection log when the entry has none.
const DEFAULT_REFLECTION_INTENSITY: u8 = 5;

/// Loaded data plus the time it was read from the store.
#[derive(Debug)]
struct Snapshot<T> {
  data: Option<T>,
  fetched_at: Option<Instant>,
}

impl<T> Snapshot<T> {
  fn empty() -> Self {
    Self {
      data: None,
      fetched_at: None,
    }
  }

  fn set(&mut self, data: T) {
    self.data = Some(data);
    self.fetched_at = Some(Instant::now());
  }

  fn invalidate(&mut self) {
    self.data = None;
    self.fetched_at = None;
  }

  /// Missing data counts as stale.
  fn is_stale(&self, stale_time: Duration) -> bool {
    match (&self.data, self.fetched_at) {
      (Some(_), Some(t)) => t.elapsed() > stale_time,
      _ => true,
    }
  }
}

pub struct AppState {
  db: LazyDatabase,
  logs: Snapshot<Vec<Log>>,
  journal: Snapshot<Vec<JournalEntry>>,
  stale_time: Duration,
}

impl AppState {
  pub fn new(db: LazyDatabase) -> Self {
    Self {
      db,
      logs: Snapshot::empty(),
      journal: Snapshot::empty(),
      stale_time: Duration::from_secs(60), // Default 1 minute
    }
  }

  /// Set how long loaded views are served before being re-read.
  #[cfg(test)]
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub async fn database(&self) -> DataResult<Arc<Database>> {
    self.db.get().await
  }

  /// All logs, newest first.
  pub async fn logs(&mut self) -> DataResult<&[Log]> {
    if self.logs.is_stale(self.stale_time) {
      let logs = self.database().await?.get_logs()?;
      self.logs.set(logs);
    }
    Ok(self.logs.data.as_deref().unwrap_or_default())
  }

  /// All journal entries, newest first.
  pub async fn journal(&mut self) -> DataResult<&[JournalEntry]> {
    if self.journal.is_stale(self.stale_time) {
      let entries = self.database().await?.get_journal_entries()?;
      self.journal.set(entries);
    }
    Ok(self.journal.data.as_deref().unwrap_or_default())
  }

  /// Drop every loaded view; the next read goes to the store.
  pub fn invalidate(&mut self) {
    self.logs.invalidate();
    self.journal.invalidate();
  }

  /// Re-read both collections now.
  pub async fn refresh(&mut self) -> DataResult<()> {
    let db = self.database().await?;
    self.logs.set(db.get_logs()?);
    self.journal.set(db.get_journal_entries()?);
    Ok(())
  }

  #[cfg(test)]
  fn is_stale(&self) -> bool {
    self.logs.is_stale(self.stale_time) || self.journal.is_stale(self.stale_time)
  }

  pub async fn add_log(&mut self, input: NewLog) -> DataResult<Log> {
    let log = self.database().await?.add_log(input)?;
    self.logs.invalidate();
    Ok(log)
  }

  pub async fn update_log(&mut self, id: i64, patch: LogPatch) -> DataResult<Log> {
    let log = self.database().await?.update_log(id, patch)?;
    self.logs.invalidate();
    Ok(log)
  }

  pub async fn delete_log(&mut self, id: i64) -> DataResult<bool> {
    let removed = self.database().await?.delete_log(id)?;
    self.logs.invalidate();
    Ok(removed)
  }

  /// Save a journal entry. With `reflect`, also record a "Journal Reflection"
  /// log so the entry shows up on the dashboard and in insights.
  pub async fn add_journal_entry(
    &mut self,
    input: NewJournalEntry,
    reflect: bool,
  ) -> DataResult<(JournalEntry, Option<Log>)> {
    let db = self.database().await?;
    let entry = db.add_journal_entry(input)?;
    self.journal.invalidate();

    let companion = if reflect {
      let intensity = entry
        .intensity
        .unwrap_or(DEFAULT_REFLECTION_INTENSITY)
        .max(1);
      let log = db.add_log(
        NewLog::new(Category::JournalReflection, intensity).with_description(entry.title.clone()),
      )?;
      self.logs.invalidate();
      Some(log)
    } else {
      None
    };

    Ok((entry, companion))
  }

  pub async fn update_journal_entry(
    &mut self,
    id: i64,
    patch: JournalPatch,
  ) -> DataResult<JournalEntry> {
    let entry = self.database().await?.update_journal_entry(id, patch)?;
    self.journal.invalidate();
    Ok(entry)
  }

  pub async fn delete_journal_entry(&mut self, id: i64) -> DataResult<bool> {
    let removed = self.database().await?.delete_journal_entry(id)?;
    self.journal.invalidate();
    Ok(removed)
  }

  /// Import a backup archive, then reload everything derived from the store.
  pub async fn import_archive(&mut self, path: &Path) -> BackupResult<ImportSummary> {
    let db = self.database().await?;
    let summary = backup::import_from_path(&db, path)?;
    self.refresh().await?;
    Ok(summary)
  }

  pub async fn clear_all(&mut self) -> DataResult<(usize, usize)> {
    let cleared = self.database().await?.clear_all()?;
    self.invalidate();
    Ok(cleared)
  }
}
