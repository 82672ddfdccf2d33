use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the database, cache and log file live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  /// Tracing filter used when MINDFUL_TRACK_LOG is not set
  pub log_level: String,
  pub cache: CacheConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir: None,
      log_level: "warn".to_string(),
      cache: CacheConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Origin whose requests are intercepted
  pub origin: String,
  pub name_prefix: String,
  /// Cache generation; changing it starts a new install
  pub version: String,
  pub network_timeout_secs: u64,
  /// Paths stored in the static partition on install
  #[serde(deserialize_with = "deserialize_patterns")]
  pub precache: Vec<String>,
  /// Path patterns served network-first (`.ext` matches a suffix, anything else a prefix)
  #[serde(deserialize_with = "deserialize_patterns")]
  pub network_first: Vec<String>,
  /// Path patterns served cache-first
  #[serde(deserialize_with = "deserialize_patterns")]
  pub cache_first: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      name_prefix: "mindful-track".to_string(),
      version: "v1".to_string(),
      network_timeout_secs: 10,
      precache: strings(&[
        "/",
        "/dashboard",
        "/journal",
        "/insights",
        "/mindfulness",
        "/settings",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]),
      network_first: strings(&["/api/", "/_next/image"]),
      cache_first: strings(&[
        "/_next/static/",
        "/icons/",
        ".woff2",
        ".woff",
        ".ttf",
        ".png",
        ".svg",
        ".ico",
      ]),
    }
  }
}

/// Trimmed, non-empty entries.
fn deserialize_patterns<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .collect(),
  )
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mindful-track.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mindful-track/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mindful-track.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mindful-track").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      "log_level: debug\ncache:\n  version: v7\n  network_first: [' /api/ ', '']\n",
    )
    .unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.cache.network_first, vec!["/api/".to_string()]);
    assert_eq!(config.cache.network_timeout_secs, 10);
    assert_eq!(config.cache.origin, "http://localhost:3000");
    assert!(config.data_dir.is_none());
  }

  #[test]
  fn test_empty_file_is_default() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.cache, CacheConfig::default());
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "data_dir: /tmp/mindful\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/mindful")));

    assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
    std::fs::write(&path, "cache: [").unwrap();
    assert!(Config::load(Some(&path)).is_err());
  }
}
