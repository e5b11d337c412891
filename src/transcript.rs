use futures::future::BoxFuture;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::constants::constants;
use crate::error::TranscriptError;

/// Source of a video's transcript text, one caption line per text line.
///
/// This is where a real caption scraper plugs in. The shipped providers
/// return fixed text or read a file.
pub trait TranscriptProvider: Send + Sync {
  fn transcript<'a>(&'a self, video_id: &'a str) -> BoxFuture<'a, Result<String, TranscriptError>>;
}

/// Returns the same four placeholder lines for every video.
pub struct PlaceholderTranscript;

impl TranscriptProvider for PlaceholderTranscript {
  fn transcript<'a>(&'a self, video_id: &'a str) -> BoxFuture<'a, Result<String, TranscriptError>> {
    Box::pin(async move {
      warn!(video_id, "transcript: no provider configured, using placeholder text");
      Ok(constants().placeholder_transcript.clone())
    })
  }
}

/// Reads the transcript from a local text file.
pub struct FileTranscript {
  pub path: PathBuf,
}

impl TranscriptProvider for FileTranscript {
  fn transcript<'a>(&'a self, video_id: &'a str) -> BoxFuture<'a, Result<String, TranscriptError>> {
    Box::pin(async move {
      let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| TranscriptError::Unavailable {
        video_id: video_id.to_string(),
        reason: format!("{}: {}", self.path.display(), e),
      })?;
      info!(video_id, path = %self.path.display(), bytes = text.len(), "transcript: loaded from file");
      Ok(text)
    })
  }
}
