//! Records kept in the local store and the inputs used to create or edit them.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use super::error::{DataError, DataResult};

/// Valid intensity for a log.
pub const LOG_INTENSITY: RangeInclusive<u8> = 1..=10;

/// Valid intensity for a journal entry (zero means "not felt").
pub const JOURNAL_INTENSITY: RangeInclusive<u8> = 0..=10;

/// Fixed set of log categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
  #[serde(rename = "Health Fear")]
  HealthFear,
  #[serde(rename = "Intrusive Thought")]
  IntrusiveThought,
  #[serde(rename = "Compulsion")]
  Compulsion,
  #[serde(rename = "Schema Trigger")]
  SchemaTrigger,
  #[serde(rename = "Accomplished")]
  Accomplished,
  #[serde(rename = "Journal Reflection")]
  JournalReflection,
}

impl Category {
  pub const ALL: [Category; 6] = [
    Category::HealthFear,
    Category::IntrusiveThought,
    Category::Compulsion,
    Category::SchemaTrigger,
    Category::Accomplished,
    Category::JournalReflection,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::HealthFear => "Health Fear",
      Category::IntrusiveThought => "Intrusive Thought",
      Category::Compulsion => "Compulsion",
      Category::SchemaTrigger => "Schema Trigger",
      Category::Accomplished => "Accomplished",
      Category::JournalReflection => "Journal Reflection",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// Accepts the display name in any case, with spaces, dashes or underscores
/// ("Health Fear", "health-fear", "HEALTH_FEAR").
impl FromStr for Category {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = squash(s);
    Category::ALL
      .into_iter()
      .find(|c| squash(c.as_str()) == wanted)
      .ok_or_else(|| {
        let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category '{}', expected one of: {}", s, names.join(", "))
      })
  }
}

fn squash(s: &str) -> String {
  s.chars()
    .filter(|c| !matches!(c, ' ' | '-' | '_'))
    .flat_map(char::to_lowercase)
    .collect()
}

impl ToSql for Category {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.as_str()))
  }
}

impl FromSql for Category {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    value
      .as_str()?
      .parse()
      .map_err(|e: String| FromSqlError::Other(e.into()))
  }
}

/// A quick mood/event entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
  pub id: i64,
  pub category: Category,
  pub intensity: u8,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Leaf of the emotion wheel selection
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub emotion: Option<String>,
  /// Full selection path, e.g. "Fear → Anxious → Worried"
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub emotion_path: Option<String>,
  pub timestamp: DateTime<Utc>,
}

/// Input for a new log. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLog {
  pub category: Category,
  pub intensity: u8,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub emotion: Option<String>,
  #[serde(default)]
  pub emotion_path: Option<String>,
}

impl NewLog {
  pub fn new(category: Category, intensity: u8) -> Self {
    Self {
      category,
      intensity,
      description: None,
      emotion: None,
      emotion_path: None,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn validate(&self) -> DataResult<()> {
    check_intensity(self.intensity, LOG_INTENSITY)
  }
}

/// Partial update for a log. `None` leaves a field untouched; for optional
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPatch {
  pub category: Option<Category>,
  pub intensity: Option<u8>,
  pub description: Option<Option<String>>,
  pub emotion: Option<Option<String>>,
  pub emotion_path: Option<Option<String>>,
}

impl LogPatch {
  pub fn is_empty(&self) -> bool {
    *self == LogPatch::default()
  }

  pub(crate) fn apply(self, log: &mut Log) {
    if let Some(category) = self.category {
      log.category = category;
    }
    if let Some(intensity) = self.intensity {
      log.intensity = intensity;
    }
    if let Some(description) = self.description {
      log.description = description;
    }
    if let Some(emotion) = self.emotion {
      log.emotion = emotion;
    }
    if let Some(emotion_path) = self.emotion_path {
      log.emotion_path = emotion_path;
    }
  }
}

/// A longer reflection with optional CBT-style annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
  pub id: i64,
  pub title: String,
  pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub intensity: Option<u8>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub trigger: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub evidence_for: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub evidence_against: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub alternative_view: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema_link: Option<String>,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJournalEntry {
  pub title: String,
  pub content: String,
  #[serde(default)]
  pub intensity: Option<u8>,
  #[serde(default)]
  pub trigger: Option<String>,
  #[serde(default)]
  pub evidence_for: Option<String>,
  #[serde(default)]
  pub evidence_against: Option<String>,
  #[serde(default)]
  pub alternative_view: Option<String>,
  #[serde(default)]
  pub schema_link: Option<String>,
}

impl NewJournalEntry {
  pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      content: content.into(),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> DataResult<()> {
    check_required("title", &self.title)?;
    check_required("content", &self.content)?;
    match self.intensity {
      Some(intensity) => check_intensity(intensity, JOURNAL_INTENSITY),
      None => Ok(()),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalPatch {
  pub title: Option<String>,
  pub content: Option<String>,
  pub intensity: Option<Option<u8>>,
  pub trigger: Option<Option<String>>,
  pub evidence_for: Option<Option<String>>,
  pub evidence_against: Option<Option<String>>,
  pub alternative_view: Option<Option<String>>,
  pub schema_link: Option<Option<String>>,
}

impl JournalPatch {
  pub fn is_empty(&self) -> bool {
    *self == JournalPatch::default()
  }

  pub(crate) fn apply(self, entry: &mut JournalEntry) {
    if let Some(title) = self.title {
      entry.title = title;
    }
    if let Some(content) = self.content {
      entry.content = content;
    }
    if let Some(intensity) = self.intensity {
      entry.intensity = intensity;
    }
    if let Some(trigger) = self.trigger {
      entry.trigger = trigger;
    }
    if let Some(evidence_for) = self.evidence_for {
      entry.evidence_for = evidence_for;
    }
    if let Some(evidence_against) = self.evidence_against {
      entry.evidence_against = evidence_against;
    }
    if let Some(alternative_view) = self.alternative_view {
      entry.alternative_view = alternative_view;
    }
    if let Some(schema_link) = self.schema_link {
      entry.schema_link = schema_link;
    }
  }
}

impl JournalEntry {
  pub(crate) fn validate(&self) -> DataResult<()> {
    check_required("title", &self.title)?;
    check_required("content", &self.content)?;
    match self.intensity {
      Some(intensity) => check_intensity(intensity, JOURNAL_INTENSITY),
      None => Ok(()),
    }
  }
}

pub(crate) fn check_intensity(intensity: u8, range: RangeInclusive<u8>) -> DataResult<()> {
  if range.contains(&intensity) {
    Ok(())
  } else {
    Err(DataError::Validation {
      field: "intensity",
      message: format!(
        "{} is outside {}..={}",
        intensity,
        range.start(),
        range.end()
      ),
    })
  }
}

fn check_required(field: &'static str, value: &str) -> DataResult<()> {
  if value.trim().is_empty() {
    Err(DataError::Validation {
      field,
      message: "must not be empty".to_string(),
    })
  } else {
    Ok(())
  }
}
