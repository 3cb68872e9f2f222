use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// Database file (defaults to $XDG_DATA_HOME/wrapsync/cache.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
}

/// Timing and retry budget of the sync engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
  /// Seconds between scheduled push drains
  pub interval_secs: u64,
  /// Failed attempts before an outbox entry is dead-lettered
  pub max_retries: u32,
  /// Upper bound on any single server call
  pub request_timeout_secs: u64,
  /// Seconds between connectivity probes
  pub probe_interval_secs: u64,
  /// Base delay before a dead-lettered entry is re-enabled (doubles per revival)
  pub dead_letter_backoff_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      max_retries: 3,
      request_timeout_secs: 15,
      probe_interval_secs: 10,
      dead_letter_backoff_secs: 300,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }

  pub fn dead_letter_backoff_ms(&self) -> i64 {
    (self.dead_letter_backoff_secs as i64).saturating_mul(1000)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./wrapsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/wrapsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/wrapsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("wrapsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("wrapsync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.sync.max_retries == 0 {
      return Err(eyre!("sync.max_retries must be at least 1"));
    }
    Ok(config)
  }

  /// Get the server API key from environment variables.
  ///
  /// Checks WRAPSYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("WRAPSYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Server API key not found. Set WRAPSYNC_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sync_section_defaults() {
    let config = Config::parse("server:\n  url: https://shop.example.co\n").unwrap();
    assert_eq!(config.sync, SyncConfig::default());
    assert_eq!(config.sync.interval(), Duration::from_secs(30));
    assert_eq!(config.sync.max_retries, 3);
    assert!(config.database.is_none());
  }

  #[test]
  fn partial_sync_section_keeps_other_defaults() {
    let yaml = "server:\n  url: https://shop.example.co\nsync:\n  max_retries: 5\n  interval_secs: 10\n";
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.sync.interval_secs, 10);
    assert_eq!(config.sync.request_timeout_secs, 15);
    assert_eq!(config.sync.dead_letter_backoff_ms(), 300_000);
  }

  #[test]
  fn zero_retry_budget_is_rejected() {
    let yaml = "server:\n  url: https://shop.example.co\nsync:\n  max_retries: 0\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }

  #[test]
  fn loads_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrapsync.yaml");
    std::fs::write(&path, "server:\n  url: https://shop.example.co\ndatabase: /tmp/x.db\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.server.url, "https://shop.example.co");
    assert_eq!(config.database, Some(PathBuf::from("/tmp/x.db")));
  }
}
