//! Error taxonomy shared by the background components.
//!
//! Cache, title and indicator errors are always absorbed where they occur.
//! Fetch and download errors travel up to the router, which turns them into
//! the visible status text.

use thiserror::Error;

/// Metadata retrieval failures. `Clone` so one in-flight lookup can hand the
/// same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Invalid video URL: Missing video ID.")]
  InvalidUrl,
  #[error("Video not found or private.")]
  NotFound,
  #[error("Access denied to video details.")]
  AccessDenied,
  #[error("Could not fetch video details (Status: {status}).")]
  Status { status: u16 },
  #[error("Failed to fetch video details: {0}")]
  Network(String),
  #[error("Failed to parse video details: {0}")]
  Parse(String),
}

impl FetchError {
  /// Map a non-2xx oEmbed status onto the error the user sees.
  pub fn from_status(status: u16) -> Self {
    match status {
      404 => FetchError::NotFound,
      401 | 403 => FetchError::AccessDenied,
      status => FetchError::Status { status },
    }
  }
}

/// Session storage failures. Never surfaced past the cache.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("session storage unavailable: {0}")]
  Unavailable(String),
  #[error("cached value has unexpected shape: {0}")]
  Corrupt(#[from] serde_json::Error),
}

/// Failures of host platform calls (tabs, script injection, blobs, downloads).
#[derive(Error, Debug)]
pub enum HostError {
  #[error("No tab with id: {0}")]
  NoSuchTab(u32),
  #[error("tab query failed: {0}")]
  TabQuery(String),
  #[error("cannot access page contents: {0}")]
  Injection(String),
  #[error("{0}")]
  Download(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Why a readable filename could not be derived. Always falls back to the default name.
#[derive(Error, Debug)]
pub enum TitleError {
  #[error(transparent)]
  Host(#[from] HostError),
  #[error("page title lookup timed out after {0:?}")]
  Timeout(std::time::Duration),
  #[error("page title is empty after cleanup")]
  Empty,
}

#[derive(Error, Debug)]
pub enum TranscriptError {
  #[error("transcript unavailable for {video_id}: {reason}")]
  Unavailable { video_id: String, reason: String },
}

/// Export failures, tagged with the stage that failed.
#[derive(Error, Debug)]
pub enum ExportError {
  #[error("Could not load transcript: {0}")]
  Transcript(#[from] TranscriptError),
  #[error("Could not prepare deck file: {0}")]
  Blob(HostError),
  #[error("Download failed: {0}")]
  Download(HostError),
}
