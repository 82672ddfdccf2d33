use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::backup::{self, BackupError};
use crate::cache::{
  self, spawn_control_loop, CacheManager, HttpNetwork, Request, SqliteStorage,
};
use crate::commands::{CacheCommand, Command, JournalCommand, LogCommand};
use crate::config::Config;
use crate::db::{
  JournalEntry, LazyDatabase, Log, NewJournalEntry, NewLog, DATABASE_FILE,
};
use crate::insights;
use crate::state::AppState;

/// Command dispatcher owning the application state.
pub struct App {
  config: Config,
  data_dir: PathBuf,
  state: AppState,
}

impl App {
  pub fn new(config: Config, data_dir: PathBuf) -> Self {
    let db = LazyDatabase::new(Some(data_dir.join(DATABASE_FILE)));
    Self {
      config,
      data_dir,
      state: AppState::new(db),
    }
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Log(cmd) => self.run_log(cmd).await,
      Command::Journal(cmd) => self.run_journal(cmd).await,
      Command::Export { dir } => self.export(&dir).await,
      Command::Import { path, yes } => self.import(&path, yes).await,
      Command::Csv { dir } => self.export_csv(&dir).await,
      Command::Insights { period } => {
        let logs = self.state.logs().await?;
        print_insights(&insights::build(logs, period));
        Ok(())
      }
      Command::Clear { yes } => {
        if !confirm("Delete ALL logs and journal entries?", yes)? {
          return Ok(());
        }
        let (logs, journal) = self.state.clear_all().await?;
        println!("Deleted {} logs and {} journal entries", logs, journal);
        Ok(())
      }
      Command::Cache(cmd) => self.run_cache(cmd).await,
    }
  }

  async fn run_log(&mut self, cmd: LogCommand) -> Result<()> {
    match cmd {
      LogCommand::Add {
        category,
        intensity,
        description,
        emotion,
        emotion_path,
      } => {
        let log = self
          .state
          .add_log(NewLog {
            category,
            intensity,
            description,
            emotion,
            emotion_path,
          })
          .await?;
        println!("Added log {}", log.id);
      }
      LogCommand::List { limit: Some(limit) } => {
        let logs = self.state.database().await?.get_recent_logs(limit)?;
        for log in &logs {
          println!("{}", format_log(log));
        }
      }
      LogCommand::List { limit: None } => {
        for log in self.state.logs().await? {
          println!("{}", format_log(log));
        }
      }
      LogCommand::Show { id } => match self.state.database().await?.get_log(id)? {
        Some(log) => println!("{}", format_log(&log)),
        None => return Err(eyre!("Log {} not found", id)),
      },
      LogCommand::Range { start, end } => {
        let logs = self
          .state
          .database()
          .await?
          .get_logs_for_date_range(start, end)?;
        for log in &logs {
          println!("{}", format_log(log));
        }
        println!("{} logs", logs.len());
      }
      LogCommand::Edit { id, changes } => {
        let patch = changes.into_patch();
        if patch.is_empty() {
          return Err(eyre!("Nothing to change"));
        }
        let log = self.state.update_log(id, patch).await?;
        println!("{}", format_log(&log));
      }
      LogCommand::Delete { id, yes } => {
        if !confirm(&format!("Delete log {}?", id), yes)? {
          return Ok(());
        }
        if self.state.delete_log(id).await? {
          println!("Deleted log {}", id);
        } else {
          println!("Log {} does not exist", id);
        }
      }
    }
    Ok(())
  }

  async fn run_journal(&mut self, cmd: JournalCommand) -> Result<()> {
    match cmd {
      JournalCommand::Add {
        title,
        content,
        intensity,
        trigger,
        evidence_for,
        evidence_against,
        alternative_view,
        schema_link,
        no_reflection,
      } => {
        let input = NewJournalEntry {
          intensity,
          trigger,
          evidence_for,
          evidence_against,
          alternative_view,
          schema_link,
          ..NewJournalEntry::new(title, content)
        };
        let (entry, companion) = self.state.add_journal_entry(input, !no_reflection).await?;
        match companion {
          Some(log) => println!("Added journal entry {} (reflection log {})", entry.id, log.id),
          None => println!("Added journal entry {}", entry.id),
        }
      }
      JournalCommand::List { limit } => {
        let entries = self.state.journal().await?;
        let shown = limit.unwrap_or(entries.len()).min(entries.len());
        for entry in &entries[..shown] {
          println!("{}", format_entry(entry));
        }
      }
      JournalCommand::Show { id } => match self.state.database().await?.get_journal_entry(id)? {
        Some(entry) => println!("{}", format_entry(&entry)),
        None => return Err(eyre!("Journal entry {} not found", id)),
      },
      JournalCommand::Edit { id, changes } => {
        let patch = changes.into_patch();
        if patch.is_empty() {
          return Err(eyre!("Nothing to change"));
        }
        let entry = self.state.update_journal_entry(id, patch).await?;
        println!("{}", format_entry(&entry));
      }
      JournalCommand::Delete { id, yes } => {
        if !confirm(&format!("Delete journal entry {}?", id), yes)? {
          return Ok(());
        }
        if self.state.delete_journal_entry(id).await? {
          println!("Deleted journal entry {}", id);
        } else {
          println!("Journal entry {} does not exist", id);
        }
      }
    }
    Ok(())
  }

  async fn export(&mut self, dir: &Path) -> Result<()> {
    let db = self.state.database().await?;
    match backup::export_to_dir(&db, dir, Local::now().date_naive()) {
      Ok((path, summary)) => {
        println!(
          "Exported {} logs and {} journal entries to {}",
          summary.logs,
          summary.journal,
          path.display()
        );
        Ok(())
      }
      Err(BackupError::NoData) => {
        println!("No data to export");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn import(&mut self, path: &Path, yes: bool) -> Result<()> {
    let prompt = format!(
      "Import {} into your existing data? Records are added, nothing is replaced.",
      path.display()
    );
    if !confirm(&prompt, yes)? {
      return Ok(());
    }
    let summary = self.state.import_archive(path).await?;
    println!("{}", summary);
    Ok(())
  }

  async fn export_csv(&mut self, dir: &Path) -> Result<()> {
    let db = self.state.database().await?;
    match backup::export_csv(&db, dir, Local::now().date_naive()) {
      Ok(path) => {
        println!("Wrote {}", path.display());
        Ok(())
      }
      Err(BackupError::NoData) => {
        println!("No logs to export");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  fn cache_manager(&self) -> Result<CacheManager<HttpNetwork, SqliteStorage>> {
    let storage = SqliteStorage::open(&self.data_dir.join(cache::CACHE_FILE))?;
    CacheManager::new(
      Arc::new(HttpNetwork::new()?),
      Arc::new(storage),
      &self.config.cache,
    )
  }

  async fn run_cache(&mut self, cmd: CacheCommand) -> Result<()> {
    let manager = Arc::new(self.cache_manager()?);
    let (control, task) = spawn_control_loop(Arc::clone(&manager));

    match cmd {
      CacheCommand::Install => {
        let state = manager.start().await?;
        println!("Cache {} is {}", manager.version(), state);
      }
      CacheCommand::Activate => {
        control.skip_waiting()?;
        // Replies come back in order, so this returns after activation ran
        control.version().await?;
        println!("Cache {} is {}", manager.version(), manager.state());
      }
      CacheCommand::Fetch {
        url,
        navigate,
        output,
      } => {
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        };
        let response = manager.handle_fetch(request).await?;
        manager.settle().await;
        println!(
          "{} {:?} {} bytes",
          response.status,
          response.source,
          response.body.len()
        );
        if let Some(path) = output {
          std::fs::write(&path, &response.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
        }
      }
      CacheCommand::Version => {
        if let Some(reply) = control.dispatch(r#"{"type":"GET_VERSION"}"#).await? {
          println!("{}", reply);
        }
      }
      CacheCommand::Status => {
        let (static_entries, dynamic_entries) = manager.entry_counts()?;
        println!("Cache {} is {}", manager.version(), manager.state());
        println!("  {:<32} {} entries", manager.static_partition(), static_entries);
        println!("  {:<32} {} entries", manager.dynamic_partition(), dynamic_entries);
        if let Some(cached_at) = manager.last_cached()? {
          println!(
            "  last cached {}",
            cached_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
          );
        }
      }
      CacheCommand::Resync => {
        let summary = control.resync().await?;
        println!(
          "Refreshed {} cached responses, {} failed",
          summary.refreshed, summary.failed
        );
      }
    }

    drop(control);
    task
      .await
      .map_err(|e| eyre!("Cache control loop failed: {}", e))?;
    info!(version = manager.version(), state = %manager.state(), "Cache command finished");
    Ok(())
  }
}

/// Ask on stderr unless `yes` was given.
fn confirm(prompt: &str, yes: bool) -> Result<bool> {
  if yes {
    return Ok(true);
  }
  eprint!("{} [y/N] ", prompt);
  io::stderr().flush()?;

  let mut answer = String::new();
  io::stdin().lock().read_line(&mut answer)?;
  let confirmed = matches!(answer.trim().to_lowercase().as_str(), "y" | "yes");
  if !confirmed {
    println!("Cancelled");
  }
  Ok(confirmed)
}

fn format_log(log: &Log) -> String {
  let mut line = format!(
    "#{:<5} {}  {:<18} {:>2}/10",
    log.id,
    log.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
    log.category,
    log.intensity
  );
  if let Some(emotion) = log.emotion_path.as_deref().or(log.emotion.as_deref()) {
    line.push_str(&format!("  [{}]", emotion));
  }
  if let Some(description) = &log.description {
    line.push_str(&format!("  {}", description));
  }
  line
}

fn format_entry(entry: &JournalEntry) -> String {
  let mut out = format!(
    "#{:<5} {}  {}",
    entry.id,
    entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
    entry.title
  );
  if let Some(intensity) = entry.intensity {
    out.push_str(&format!(" ({}/10)", intensity));
  }
  out.push_str(&format!("\n       {}", entry.content));
  let notes = [
    ("Trigger", &entry.trigger),
    ("Evidence for", &entry.evidence_for),
    ("Evidence against", &entry.evidence_against),
    ("Alternative view", &entry.alternative_view),
    ("Schema", &entry.schema_link),
  ];
  for (label, value) in notes {
    if let Some(value) = value {
      out.push_str(&format!("\n       {}: {}", label, value));
    }
  }
  out
}

fn print_insights(insights: &insights::Insights) {
  println!("Total logs: {}", insights.total);
  match insights.average_intensity {
    Some(avg) => println!("Average intensity: {:.2}", avg),
    None => println!("Average intensity: -"),
  }
  for (category, count) in &insights.by_category {
    println!("  {:<18} {}", category, count);
  }
  for period in &insights.periods {
    println!(
      "{:<10} {:>4} logs  avg {:.2}",
      period.label, period.count, period.average_intensity
    );
  }
}
