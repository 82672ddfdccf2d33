use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::db::{Category, JournalPatch, LogPatch};
use crate::insights::Period;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Record and browse mood/event logs
  #[command(subcommand)]
  Log(LogCommand),

  /// Write and browse journal entries
  #[command(subcommand)]
  Journal(JournalCommand),

  /// Write a backup archive of all logs and journal entries
  Export {
    /// Directory the archive is written to
    #[arg(long, default_value = ".")]
    dir: PathBuf,
  },

  /// Merge a backup archive into the store
  Import {
    path: PathBuf,
    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,
  },

  /// Export logs as CSV
  Csv {
    #[arg(long, default_value = ".")]
    dir: PathBuf,
  },

  /// Averages and per-period summaries
  Insights {
    /// daily, weekly or monthly
    #[arg(long, default_value_t = Period::Daily)]
    period: Period,
  },

  /// Delete every log and journal entry
  Clear {
    #[arg(short, long)]
    yes: bool,
  },

  /// Manage the offline resource cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum LogCommand {
  Add {
    /// Health Fear, Intrusive Thought, Compulsion, Schema Trigger, Accomplished or Journal Reflection
    #[arg(short, long)]
    category: Category,
    /// 1-10
    #[arg(short, long)]
    intensity: u8,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long)]
    emotion: Option<String>,
    #[arg(long)]
    emotion_path: Option<String>,
  },

  /// Most recent logs first
  List {
    #[arg(short = 'n', long)]
    limit: Option<usize>,
  },

  Show {
    id: i64,
  },

  /// Logs between two dates (inclusive); dates are YYYY-MM-DD or RFC 3339
  Range {
    #[arg(value_parser = parse_start)]
    start: DateTime<Utc>,
    #[arg(value_parser = parse_end)]
    end: DateTime<Utc>,
  },

  Edit {
    id: i64,
    #[command(flatten)]
    changes: LogEdit,
  },

  Delete {
    id: i64,
    #[arg(short, long)]
    yes: bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum JournalCommand {
  Add {
    #[arg(short, long)]
    title: String,
    #[arg(short, long)]
    content: String,
    /// 0-10
    #[arg(short, long)]
    intensity: Option<u8>,
    #[arg(long)]
    trigger: Option<String>,
    #[arg(long)]
    evidence_for: Option<String>,
    #[arg(long)]
    evidence_against: Option<String>,
    #[arg(long)]
    alternative_view: Option<String>,
    #[arg(long)]
    schema_link: Option<String>,
    /// Skip the companion "Journal Reflection" log
    #[arg(long)]
    no_reflection: bool,
  },

  List {
    #[arg(short = 'n', long)]
    limit: Option<usize>,
  },

  Show {
    id: i64,
  },

  Edit {
    id: i64,
    #[command(flatten)]
    changes: JournalEdit,
  },

  Delete {
    id: i64,
    #[arg(short, long)]
    yes: bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Precache the configured routes
  Install,
  /// Take over from the previous cache generation
  Activate,
  /// Fetch a URL through the cache
  Fetch {
    url: url::Url,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Write the body here instead of printing a summary only
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Print the cache generation
  Version,
  /// Lifecycle state and partition sizes
  Status,
  /// Refresh every cached API response
  Resync,
}

/// Field changes for `log edit`. Optional fields can be set or cleared.
#[derive(Args, Debug, Default)]
pub struct LogEdit {
  #[arg(short, long)]
  category: Option<Category>,
  #[arg(short, long)]
  intensity: Option<u8>,
  #[arg(short, long, conflicts_with = "clear_description")]
  description: Option<String>,
  #[arg(long)]
  clear_description: bool,
  #[arg(long, conflicts_with = "clear_emotion")]
  emotion: Option<String>,
  #[arg(long)]
  clear_emotion: bool,
  #[arg(long, conflicts_with = "clear_emotion_path")]
  emotion_path: Option<String>,
  #[arg(long)]
  clear_emotion_path: bool,
}

impl LogEdit {
  pub fn into_patch(self) -> LogPatch {
    LogPatch {
      category: self.category,
      intensity: self.intensity,
      description: edit(self.description, self.clear_description),
      emotion: edit(self.emotion, self.clear_emotion),
      emotion_path: edit(self.emotion_path, self.clear_emotion_path),
    }
  }
}

/// Field changes for `journal edit`. Title and content can only be replaced.
#[derive(Args, Debug, Default)]
pub struct JournalEdit {
  #[arg(short, long)]
  title: Option<String>,
  #[arg(short, long)]
  content: Option<String>,
  #[arg(short, long, conflicts_with = "clear_intensity")]
  intensity: Option<u8>,
  #[arg(long)]
  clear_intensity: bool,
  #[arg(long, conflicts_with = "clear_trigger")]
  trigger: Option<String>,
  #[arg(long)]
  clear_trigger: bool,
  #[arg(long, conflicts_with = "clear_evidence_for")]
  evidence_for: Option<String>,
  #[arg(long)]
  clear_evidence_for: bool,
  #[arg(long, conflicts_with = "clear_evidence_against")]
  evidence_against: Option<String>,
  #[arg(long)]
  clear_evidence_against: bool,
  #[arg(long, conflicts_with = "clear_alternative_view")]
  alternative_view: Option<String>,
  #[arg(long)]
  clear_alternative_view: bool,
  #[arg(long, conflicts_with = "clear_schema_link")]
  schema_link: Option<String>,
  #[arg(long)]
  clear_schema_link: bool,
}

impl JournalEdit {
  pub fn into_patch(self) -> JournalPatch {
    JournalPatch {
      title: self.title,
      content: self.content,
      intensity: edit(self.intensity, self.clear_intensity),
      trigger: edit(self.trigger, self.clear_trigger),
      evidence_for: edit(self.evidence_for, self.clear_evidence_for),
      evidence_against: edit(self.evidence_against, self.clear_evidence_against),
      alternative_view: edit(self.alternative_view, self.clear_alternative_view),
      schema_link: edit(self.schema_link, self.clear_schema_link),
    }
  }
}

/// `Some(None)` clears, `Some(Some(v))` sets, `None` leaves the field alone.
fn edit<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
  if clear {
    Some(None)
  } else {
    value.map(Some)
  }
}

fn parse_bound(s: &str, time: NaiveTime) -> Result<DateTime<Utc>, String> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map(|date| date.and_time(time).and_utc())
    .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD or RFC 3339", s))
}

/// A bare date starts at midnight.
pub fn parse_start(s: &str) -> Result<DateTime<Utc>, String> {
  parse_bound(s, NaiveTime::MIN)
}

/// A bare date covers the whole day.
pub fn parse_end(s: &str) -> Result<DateTime<Utc>, String> {
  let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    .ok_or_else(|| "invalid end of day".to_string())?;
  parse_bound(s, end_of_day)
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("mindful-track").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_log_edit_sets_and_clears_optional_fields() {
    let Command::Log(LogCommand::Edit { id, changes }) = parse(&[
      "log",
      "edit",
      "4",
      "--emotion",
      "Fear",
      "--emotion-path",
      "Fear > Anxious",
      "--clear-description",
    ]) else {
      panic!("expected log edit");
    };
    assert_eq!(id, 4);
    assert_eq!(
      changes.into_patch(),
      LogPatch {
        description: Some(None),
        emotion: Some(Some("Fear".to_string())),
        emotion_path: Some(Some("Fear > Anxious".to_string())),
        ..LogPatch::default()
      }
    );

    let Command::Log(LogCommand::Edit { changes, .. }) =
      parse(&["log", "edit", "4", "--clear-emotion", "--clear-emotion-path"])
    else {
      panic!("expected log edit");
    };
    let patch = changes.into_patch();
    assert_eq!(patch.emotion, Some(None));
    assert_eq!(patch.emotion_path, Some(None));
    assert_eq!(patch.description, None);
  }

  #[test]
  fn test_journal_edit_clears_cbt_fields() {
    let Command::Journal(JournalCommand::Edit { changes, .. }) = parse(&[
      "journal",
      "edit",
      "2",
      "--title",
      "Evening review",
      "--clear-trigger",
      "--clear-intensity",
      "--schema-link",
      "Defectiveness",
    ]) else {
      panic!("expected journal edit");
    };
    assert_eq!(
      changes.into_patch(),
      JournalPatch {
        title: Some("Evening review".to_string()),
        intensity: Some(None),
        trigger: Some(None),
        schema_link: Some(Some("Defectiveness".to_string())),
        ..JournalPatch::default()
      }
    );
  }

  #[test]
  fn test_set_and_clear_conflict() {
    let args = ["mindful-track", "log", "edit", "1", "--emotion", "Joy", "--clear-emotion"];
    assert!(Cli::try_parse_from(args).is_err());
    assert!(JournalEdit::default().into_patch().is_empty());
  }

  #[test]
  fn test_date_bounds() {
    assert_eq!(
      parse_start("2024-03-01").unwrap().to_rfc3339(),
      "2024-03-01T00:00:00+00:00"
    );
    assert_eq!(
      parse_end("2024-03-01").unwrap(),
      "2024-03-01T23:59:59.999Z".parse::<DateTime<Utc>>().unwrap()
    );
    assert_eq!(
      parse_end("2024-03-01T10:00:00+02:00").unwrap(),
      "2024-03-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
    );
    assert!(parse_start("yesterday").is_err());
  }
}
