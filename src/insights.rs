//! Aggregations over logs for the insights view.

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::db::{Category, Log};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
  #[default]
  Daily,
  Weekly,
  Monthly,
}

impl Period {
  /// First day of the bucket that contains `date`.
  fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
    match self {
      Period::Daily => date,
      Period::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
      Period::Monthly => date.with_day(1).unwrap_or(date),
    }
  }

  fn label(&self, start: NaiveDate) -> String {
    match self {
      Period::Daily => start.format("%Y-%m-%d").to_string(),
      Period::Weekly => {
        let week = start.iso_week();
        format!("{}-W{:02}", week.year(), week.week())
      }
      Period::Monthly => start.format("%Y-%m").to_string(),
    }
  }
}

impl FromStr for Period {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "daily" | "day" | "d" => Ok(Period::Daily),
      "weekly" | "week" | "w" => Ok(Period::Weekly),
      "monthly" | "month" | "m" => Ok(Period::Monthly),
      other => Err(format!(
        "unknown period '{}', expected daily, weekly or monthly",
        other
      )),
    }
  }
}

impl fmt::Display for Period {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Period::Daily => "daily",
      Period::Weekly => "weekly",
      Period::Monthly => "monthly",
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSummary {
  pub label: String,
  pub start: NaiveDate,
  pub count: usize,
  pub average_intensity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insights {
  pub total: usize,
  pub average_intensity: Option<f64>,
  pub by_category: BTreeMap<Category, usize>,
  /// Most recent bucket first
  pub periods: Vec<PeriodSummary>,
}

pub fn average_intensity(logs: &[Log]) -> Option<f64> {
  if logs.is_empty() {
    return None;
  }
  let sum: u32 = logs.iter().map(|l| u32::from(l.intensity)).sum();
  Some(f64::from(sum) / logs.len() as f64)
}

pub fn category_counts(logs: &[Log]) -> BTreeMap<Category, usize> {
  let mut counts = BTreeMap::new();
  for log in logs {
    *counts.entry(log.category).or_insert(0) += 1;
  }
  counts
}

/// Group logs into calendar buckets (UTC), most recent first.
pub fn summarize(logs: &[Log], period: Period) -> Vec<PeriodSummary> {
  let mut buckets: BTreeMap<NaiveDate, (usize, u32)> = BTreeMap::new();
  for log in logs {
    let start = period.bucket_start(log.timestamp.date_naive());
    let bucket = buckets.entry(start).or_insert((0, 0));
    bucket.0 += 1;
    bucket.1 += u32::from(log.intensity);
  }

  buckets
    .into_iter()
    .rev()
    .map(|(start, (count, sum))| PeriodSummary {
      label: period.label(start),
      start,
      count,
      average_intensity: f64::from(sum) / count as f64,
    })
    .collect()
}

pub fn build(logs: &[Log], period: Period) -> Insights {
  Insights {
    total: logs.len(),
    average_intensity: average_intensity(logs),
    by_category: category_counts(logs),
    periods: summarize(logs, period),
  }
}
