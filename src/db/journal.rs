//! Journal collection queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{DataError, DataResult};
use super::types::{JournalEntry, JournalPatch, NewJournalEntry};
use super::{from_db_time, now, to_db_time, Database};

const JOURNAL_COLUMNS: &str = "id, title, content, intensity, trigger_note, evidence_for, \
  evidence_against, alternative_view, schema_link, timestamp";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
  let timestamp: String = row.get(9)?;
  Ok(JournalEntry {
    id: row.get(0)?,
    title: row.get(1)?,
    content: row.get(2)?,
    intensity: row.get(3)?,
    trigger: row.get(4)?,
    evidence_for: row.get(5)?,
    evidence_against: row.get(6)?,
    alternative_view: row.get(7)?,
    schema_link: row.get(8)?,
    timestamp: from_db_time(&timestamp)?,
  })
}

pub(super) fn insert_entry(
  conn: &Connection,
  input: &NewJournalEntry,
  timestamp: &DateTime<Utc>,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO journal (title, content, intensity, trigger_note, evidence_for, evidence_against,
       alternative_view, schema_link, timestamp)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    params![
      input.title,
      input.content,
      input.intensity,
      input.trigger,
      input.evidence_for,
      input.evidence_against,
      input.alternative_view,
      input.schema_link,
      to_db_time(timestamp)
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

fn find_entry(conn: &Connection, id: i64) -> DataResult<Option<JournalEntry>> {
  let entry = conn
    .query_row(
      &format!("SELECT {} FROM journal WHERE id = ?1", JOURNAL_COLUMNS),
      params![id],
      row_to_entry,
    )
    .optional()?;
  Ok(entry)
}

impl Database {
  pub fn add_journal_entry(&self, input: NewJournalEntry) -> DataResult<JournalEntry> {
    input.validate()?;
    let timestamp = now();
    let conn = self.conn()?;
    let id = insert_entry(&conn, &input, &timestamp)?;

    Ok(JournalEntry {
      id,
      title: input.title,
      content: input.content,
      intensity: input.intensity,
      trigger: input.trigger,
      evidence_for: input.evidence_for,
      evidence_against: input.evidence_against,
      alternative_view: input.alternative_view,
      schema_link: input.schema_link,
      timestamp,
    })
  }

  /// All journal entries, most recent first.
  pub fn get_journal_entries(&self) -> DataResult<Vec<JournalEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT {} FROM journal ORDER BY timestamp DESC, id DESC",
      JOURNAL_COLUMNS
    ))?;
    let entries = stmt
      .query_map([], row_to_entry)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
  }

  pub fn get_journal_entry(&self, id: i64) -> DataResult<Option<JournalEntry>> {
    let conn = self.conn()?;
    find_entry(&conn, id)
  }

  /// Merge `patch` into an existing entry. Id and timestamp never change.
  pub fn update_journal_entry(&self, id: i64, patch: JournalPatch) -> DataResult<JournalEntry> {
    let conn = self.conn()?;
    let mut entry = find_entry(&conn, id)?.ok_or(DataError::NotFound {
      collection: "journal entry",
      id,
    })?;

    patch.apply(&mut entry);
    entry.validate()?;

    conn.execute(
      "UPDATE journal SET title = ?1, content = ?2, intensity = ?3, trigger_note = ?4,
         evidence_for = ?5, evidence_against = ?6, alternative_view = ?7, schema_link = ?8
       WHERE id = ?9",
      params![
        entry.title,
        entry.content,
        entry.intensity,
        entry.trigger,
        entry.evidence_for,
        entry.evidence_against,
        entry.alternative_view,
        entry.schema_link,
        id
      ],
    )?;

    Ok(entry)
  }

  /// Remove an entry. Deleting an id that is already gone is not an error.
  pub fn delete_journal_entry(&self, id: i64) -> DataResult<bool> {
    let conn = self.conn()?;
    let removed = conn.execute("DELETE FROM journal WHERE id = ?1", params![id])?;
    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn reflection() -> NewJournalEntry {
    NewJournalEntry {
      title: "Morning worry".to_string(),
      content: "Woke up anxious about the appointment.".to_string(),
      intensity: Some(6),
      trigger: Some("Calendar reminder".to_string()),
      evidence_for: None,
      evidence_against: Some("Last check-up was fine".to_string()),
      alternative_view: Some("It is routine".to_string()),
      schema_link: None,
    }
  }

  #[test]
  fn test_add_and_list_entries() {
    let db = Database::open_in_memory().unwrap();
    let first = db.add_journal_entry(NewJournalEntry::new("First", "a")).unwrap();
    let second = db.add_journal_entry(reflection()).unwrap();

    let entries = db.get_journal_entries().unwrap();
    assert_eq!(entries.len(), 2);
    // Same-millisecond inserts fall back to id order.
    assert_eq!(entries[0].id, second.id);
    assert_eq!(entries[1].id, first.id);
    assert_eq!(entries[0], second);
    assert_eq!(entries[0].trigger.as_deref(), Some("Calendar reminder"));
  }

  #[test]
  fn test_title_and_content_are_required() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      db.add_journal_entry(NewJournalEntry::new("", "body")),
      Err(DataError::Validation { field: "title", .. })
    ));
    assert!(matches!(
      db.add_journal_entry(NewJournalEntry::new("title", "   ")),
      Err(DataError::Validation {
        field: "content",
        ..
      })
    ));
  }

  #[test]
  fn test_update_entry_keeps_id_and_timestamp() {
    let db = Database::open_in_memory().unwrap();
    let original = db.add_journal_entry(reflection()).unwrap();

    let updated = db
      .update_journal_entry(
        original.id,
        JournalPatch {
          title: Some("Evening review".to_string()),
          evidence_for: Some(Some("Heart was racing".to_string())),
          trigger: Some(None),
          ..Default::default()
        },
      )
      .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.timestamp, original.timestamp);
    assert_eq!(updated.content, original.content);
    assert_eq!(updated.title, "Evening review");
    assert_eq!(updated.trigger, None);
    assert_eq!(db.get_journal_entry(original.id).unwrap(), Some(updated));
  }

  #[test]
  fn test_get_entry_by_id() {
    let db = Database::open_in_memory().unwrap();
    let entry = db.add_journal_entry(reflection()).unwrap();
    assert_eq!(db.get_journal_entry(entry.id).unwrap(), Some(entry.clone()));
    assert_eq!(db.get_journal_entry(entry.id + 1).unwrap(), None);
  }

  #[test]
  fn test_update_cannot_blank_title() {
    let db = Database::open_in_memory().unwrap();
    let entry = db.add_journal_entry(reflection()).unwrap();
    let patch = JournalPatch {
      title: Some(String::new()),
      ..Default::default()
    };
    assert!(db.update_journal_entry(entry.id, patch).is_err());
  }

  #[test]
  fn test_update_missing_entry_is_not_found() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      db.update_journal_entry(9, JournalPatch::default()),
      Err(DataError::NotFound { id: 9, .. })
    ));
  }

  #[test]
  fn test_delete_entry_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let entry = db.add_journal_entry(reflection()).unwrap();
    assert!(db.delete_journal_entry(entry.id).unwrap());
    assert!(!db.delete_journal_entry(entry.id).unwrap());
    assert!(db.get_journal_entries().unwrap().is_empty());
  }
}
