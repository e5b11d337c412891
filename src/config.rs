use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::constants;

/// User preferences from `prefs.toml` in the platform config directory.
/// Anything missing falls back to the built-in constants.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub oembed_endpoint: Option<String>,
  pub output_dir: Option<PathBuf>,
  pub save_as: Option<bool>,
  pub log_level: Option<String>,
  pub title_timeout_ms: Option<u64>,
}

impl Config {
  fn path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tubecards").map(|dirs| dirs.config_dir().join("prefs.toml"))
  }

  pub fn load() -> Self {
    if let Some(config_file) = Self::path()
      && let Ok(content) = std::fs::read_to_string(config_file)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save(&self) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    let config_file = Self::path().context("No config directory on this platform")?;
    if let Some(dir) = config_file.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("Failed to serialize preferences")?;
    std::fs::write(&config_file, content).with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(config_file)
  }

  pub fn endpoint(&self) -> String {
    self.oembed_endpoint.clone().unwrap_or_else(|| constants().oembed_endpoint.clone())
  }

  /// Configured output directory, else the user's Downloads folder, else the working directory.
  pub fn output_dir(&self) -> PathBuf {
    self
      .output_dir
      .clone()
      .or_else(|| UserDirs::new().and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf())))
      .unwrap_or_else(|| PathBuf::from("."))
  }

  pub fn save_as(&self) -> bool {
    self.save_as.unwrap_or(true)
  }

  pub fn title_timeout(&self) -> Duration {
    self.title_timeout_ms.map(Duration::from_millis).unwrap_or_else(|| constants().title_timeout())
  }

  pub fn log_level(&self) -> &str {
    self.log_level.as_deref().unwrap_or("info")
  }
}
