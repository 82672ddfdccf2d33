mod app;
mod backup;
mod cache;
mod commands;
mod config;
mod db;
mod insights;
mod state;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file written inside the data directory.
const LOG_FILE: &str = "mindful-track.log";

#[derive(Parser, Debug)]
#[command(name = "mindful-track")]
#[command(about = "Local-first mood logging and journaling")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mindful-track/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Directory for the database, cache and log file
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

/// Stderr plus a plain-text log file. MINDFUL_TRACK_LOG overrides the configured level.
fn init_tracing(log_level: &str, data_dir: &Path) -> Result<()> {
  let filter = EnvFilter::try_from_env("MINDFUL_TRACK_LOG")
    .or_else(|_| EnvFilter::try_new(log_level))
    .unwrap_or_else(|_| EnvFilter::new("warn"));

  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  std::fs::create_dir_all(data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;
  let file_appender = tracing_appender::rolling::never(data_dir, LOG_FILE);
  let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .init();

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Command line wins over the config file
  let data_dir = match args.data_dir.or_else(|| config.data_dir.clone()) {
    Some(dir) => dir,
    None => db::default_data_dir()?,
  };

  init_tracing(&config.log_level, &data_dir)?;
  tracing::debug!(data_dir = %data_dir.display(), "Starting");

  let mut app = app::App::new(config, data_dir);
  app.run(args.command).await?;

  Ok(())
}
