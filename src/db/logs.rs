//! Log collection queries.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{DataError, DataResult};
use super::types::{Log, LogPatch, NewLog};
use super::{from_db_time, now, to_db_time, Database};

const LOG_COLUMNS: &str = "id, category, intensity, description, emotion, emotion_path, timestamp";

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<Log> {
  let timestamp: String = row.get(6)?;
  Ok(Log {
    id: row.get(0)?,
    category: row.get(1)?,
    intensity: row.get(2)?,
    description: row.get(3)?,
    emotion: row.get(4)?,
    emotion_path: row.get(5)?,
    timestamp: from_db_time(&timestamp)?,
  })
}

/// Insert without validation. Shared by the quick-log path and import.
pub(super) fn insert_log(
  conn: &Connection,
  input: &NewLog,
  timestamp: &DateTime<Utc>,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO logs (category, intensity, description, emotion, emotion_path, timestamp)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    params![
      input.category,
      input.intensity,
      input.description,
      input.emotion,
      input.emotion_path,
      to_db_time(timestamp)
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

fn query_logs(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> DataResult<Vec<Log>> {
  let mut stmt = conn.prepare(sql)?;
  let logs = stmt
    .query_map(params, row_to_log)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(logs)
}

impl Database {
  /// Validate, stamp with the current time and insert a log.
  pub fn add_log(&self, input: NewLog) -> DataResult<Log> {
    input.validate()?;
    let timestamp = now();
    let conn = self.conn()?;
    let id = insert_log(&conn, &input, &timestamp)?;

    Ok(Log {
      id,
      category: input.category,
      intensity: input.intensity,
      description: input.description,
      emotion: input.emotion,
      emotion_path: input.emotion_path,
      timestamp,
    })
  }

  /// All logs, most recent first.
  pub fn get_logs(&self) -> DataResult<Vec<Log>> {
    let conn = self.conn()?;
    query_logs(
      &conn,
      &format!(
        "SELECT {} FROM logs ORDER BY timestamp DESC, id DESC",
        LOG_COLUMNS
      ),
      params![],
    )
  }

  /// The `limit` most recent logs.
  pub fn get_recent_logs(&self, limit: usize) -> DataResult<Vec<Log>> {
    if limit == 0 {
      return Ok(Vec::new());
    }
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let conn = self.conn()?;
    query_logs(
      &conn,
      &format!(
        "SELECT {} FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
        LOG_COLUMNS
      ),
      params![limit],
    )
  }

  /// Logs with `start <= timestamp <= end`, most recent first.
  pub fn get_logs_for_date_range(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> DataResult<Vec<Log>> {
    if start > end {
      return Err(DataError::InvalidRange { start, end });
    }

    // Stored timestamps have millisecond precision.
    let lower = start.trunc_subsecs(3);
    let lower = if lower < start {
      lower + Duration::milliseconds(1)
    } else {
      lower
    };
    let upper = end.trunc_subsecs(3);

    let conn = self.conn()?;
    query_logs(
      &conn,
      &format!(
        "SELECT {} FROM logs WHERE timestamp BETWEEN ?1 AND ?2
         ORDER BY timestamp DESC, id DESC",
        LOG_COLUMNS
      ),
      params![to_db_time(&lower), to_db_time(&upper)],
    )
  }

  pub fn get_log(&self, id: i64) -> DataResult<Option<Log>> {
    let conn = self.conn()?;
    let log = conn
      .query_row(
        &format!("SELECT {} FROM logs WHERE id = ?1", LOG_COLUMNS),
        params![id],
        row_to_log,
      )
      .optional()?;
    Ok(log)
  }

  /// Merge `patch` into an existing log. Id and timestamp never change.
  pub fn update_log(&self, id: i64, patch: LogPatch) -> DataResult<Log> {
    let conn = self.conn()?;
    let mut log = conn
      .query_row(
        &format!("SELECT {} FROM logs WHERE id = ?1", LOG_COLUMNS),
        params![id],
        row_to_log,
      )
      .optional()?
      .ok_or(DataError::NotFound {
        collection: "log",
        id,
      })?;

    patch.apply(&mut log);
    super::types::check_intensity(log.intensity, super::types::LOG_INTENSITY)?;

    conn.execute(
      "UPDATE logs SET category = ?1, intensity = ?2, description = ?3, emotion = ?4, emotion_path = ?5
       WHERE id = ?6",
      params![
        log.category,
        log.intensity,
        log.description,
        log.emotion,
        log.emotion_path,
        id
      ],
    )?;

    Ok(log)
  }

  /// Remove a log. Deleting an id that is already gone is not an error.
  /// Returns whether a record was removed.
  pub fn delete_log(&self, id: i64) -> DataResult<bool> {
    let conn = self.conn()?;
    let removed = conn.execute("DELETE FROM logs WHERE id = ?1", params![id])?;
    Ok(removed > 0)
  }

  #[cfg(test)]
  pub(crate) fn insert_log_at(&self, input: &NewLog, timestamp: DateTime<Utc>) -> DataResult<i64> {
    let conn = self.conn()?;
    Ok(insert_log(&conn, input, &timestamp.trunc_subsecs(3))?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::types::Category;
  use proptest::prelude::*;

  fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
  }

  #[test]
  fn test_add_log_is_returned_first() {
    let db = Database::open_in_memory().unwrap();
    db.insert_log_at(&NewLog::new(Category::Compulsion, 2), at("2020-01-01T00:00:00Z"))
      .unwrap();

    let input = NewLog::new(Category::HealthFear, 7).with_description("chest tightness");
    let added = db.add_log(input.clone()).unwrap();

    let logs = db.get_logs().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0], added);
    assert_eq!(logs[0].category, input.category);
    assert_eq!(logs[0].intensity, 7);
    assert_eq!(logs[0].description.as_deref(), Some("chest tightness"));
  }

  #[test]
  fn test_add_log_rejects_out_of_range_intensity() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      db.add_log(NewLog::new(Category::Compulsion, 0)),
      Err(DataError::Validation { .. })
    ));
    assert!(db.get_logs().unwrap().is_empty());
  }

  #[test]
  fn test_logs_are_ordered_most_recent_first() {
    let db = Database::open_in_memory().unwrap();
    for (intensity, ts) in [
      (3, "2024-05-01T08:00:00Z"),
      (9, "2024-05-03T08:00:00Z"),
      (5, "2024-05-02T08:00:00Z"),
    ] {
      db.insert_log_at(&NewLog::new(Category::Accomplished, intensity), at(ts))
        .unwrap();
    }

    let intensities: Vec<u8> = db.get_logs().unwrap().iter().map(|l| l.intensity).collect();
    assert_eq!(intensities, vec![9, 5, 3]);
  }

  #[test]
  fn test_recent_logs_limit() {
    let db = Database::open_in_memory().unwrap();
    for i in 1..=3 {
      db.insert_log_at(
        &NewLog::new(Category::Compulsion, i),
        at("2024-01-01T00:00:00Z") + Duration::hours(i as i64),
      )
      .unwrap();
    }

    assert!(db.get_recent_logs(0).unwrap().is_empty());
    let recent = db.get_recent_logs(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].intensity, 3);
    assert_eq!(db.get_recent_logs(50).unwrap().len(), 3);
  }

  #[test]
  fn test_update_keeps_id_and_timestamp() {
    let db = Database::open_in_memory().unwrap();
    let original = db
      .add_log(NewLog::new(Category::IntrusiveThought, 4).with_description("before"))
      .unwrap();

    let updated = db
      .update_log(
        original.id,
        LogPatch {
          intensity: Some(8),
          description: Some(None),
          ..Default::default()
        },
      )
      .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.timestamp, original.timestamp);
    assert_eq!(updated.category, Category::IntrusiveThought);

    let stored = db.get_log(original.id).unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(stored.intensity, 8);
    assert_eq!(stored.description, None);
  }

  #[test]
  fn test_update_missing_log_is_not_found() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      db.update_log(42, LogPatch::default()),
      Err(DataError::NotFound { id: 42, .. })
    ));
  }

  #[test]
  fn test_update_rejects_invalid_intensity() {
    let db = Database::open_in_memory().unwrap();
    let log = db.add_log(NewLog::new(Category::Compulsion, 4)).unwrap();
    let patch = LogPatch {
      intensity: Some(11),
      ..Default::default()
    };
    assert!(db.update_log(log.id, patch).is_err());
    assert_eq!(db.get_log(log.id).unwrap().unwrap().intensity, 4);
  }

  #[test]
  fn test_delete_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let log = db.add_log(NewLog::new(Category::Compulsion, 4)).unwrap();

    assert!(db.delete_log(log.id).unwrap());
    assert!(!db.delete_log(log.id).unwrap());
    assert!(db.get_log(log.id).unwrap().is_none());
    assert!(db.get_logs().unwrap().iter().all(|l| l.id != log.id));
  }

  #[test]
  fn test_ids_are_not_reused_after_delete() {
    let db = Database::open_in_memory().unwrap();
    let first = db.add_log(NewLog::new(Category::Compulsion, 4)).unwrap();
    db.delete_log(first.id).unwrap();
    let second = db.add_log(NewLog::new(Category::Compulsion, 4)).unwrap();
    assert!(second.id > first.id);
  }

  #[test]
  fn test_range_bounds_are_inclusive() {
    let db = Database::open_in_memory().unwrap();
    for ts in [
      "2024-02-01T00:00:00Z",
      "2024-02-10T12:00:00Z",
      "2024-02-20T23:59:59.999Z",
      "2024-02-21T00:00:00Z",
    ] {
      db.insert_log_at(&NewLog::new(Category::Compulsion, 5), at(ts))
        .unwrap();
    }

    let logs = db
      .get_logs_for_date_range(at("2024-02-01T00:00:00Z"), at("2024-02-20T23:59:59.999Z"))
      .unwrap();
    let stamps: Vec<String> = logs.iter().map(|l| to_db_time(&l.timestamp)).collect();
    assert_eq!(
      stamps,
      vec![
        "2024-02-20T23:59:59.999Z",
        "2024-02-10T12:00:00.000Z",
        "2024-02-01T00:00:00.000Z",
      ]
    );
  }

  #[test]
  fn test_range_rejects_start_after_end() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      db.get_logs_for_date_range(at("2024-03-02T00:00:00Z"), at("2024-03-01T00:00:00Z")),
      Err(DataError::InvalidRange { .. })
    ));
  }

  proptest! {
    #[test]
    fn prop_range_matches_filter(
      offsets in prop::collection::vec(0i64..1_000_000, 0..40),
      a in 0i64..1_000_000,
      b in 0i64..1_000_000,
    ) {
      let base = at("2024-01-01T00:00:00Z");
      let db = Database::open_in_memory().unwrap();
      for offset in &offsets {
        db.insert_log_at(&NewLog::new(Category::Accomplished, 5), base + Duration::seconds(*offset))
          .unwrap();
      }

      let (lo, hi) = (a.min(b), a.max(b));
      let start = base + Duration::seconds(lo);
      let end = base + Duration::seconds(hi);
      let logs = db.get_logs_for_date_range(start, end).unwrap();

      let expected = offsets.iter().filter(|o| lo <= **o && **o <= hi).count();
      prop_assert_eq!(logs.len(), expected);
      prop_assert!(logs.iter().all(|l| start <= l.timestamp && l.timestamp <= end));
      prop_assert!(logs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }
  }
}
