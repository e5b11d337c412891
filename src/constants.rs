//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Watch page detection and metadata lookup
  pub watch_pattern: String,
  pub video_id_param: String,
  pub oembed_endpoint: String,
  pub fetch_timeout_ms: u64,

  // Session cache
  pub cache_key_prefix: String,

  // Export
  pub site_title_suffix: String,
  pub fallback_id_token: String,
  pub csv_mime: String,
  pub title_timeout_ms: u64,

  pub placeholder_transcript: String,

  // User-facing text
  pub not_watch_page_message: String,
  pub open_video_message: String,
  pub tab_query_failed_message: String,
  pub export_success_message: String,
  pub export_success_default_name_message: String,
}

impl Constants {
  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }

  pub fn title_timeout(&self) -> Duration {
    Duration::from_millis(self.title_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed the first test run catches it.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
