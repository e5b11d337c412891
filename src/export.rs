use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::constants;
use crate::deck;
use crate::error::{ExportError, TitleError};
use crate::platform::{BlobStore, DownloadId, DownloadRequest, Downloader, TabHost, TabId};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| {
  // Safety: constant pattern, exercised by tests.
  Regex::new(r"[^A-Za-z0-9_\s]").expect("filename regex is valid")
});

/// Turn a page title into a filename stem: drop the trailing site name and
/// replace everything but ASCII word characters and whitespace with `_`.
/// `None` when nothing is left.
pub fn clean_page_title(title: &str) -> Option<String> {
  let title = title.strip_suffix(constants().site_title_suffix.as_str()).unwrap_or(title);
  let cleaned = NON_WORD.replace_all(title, "_");
  if cleaned.is_empty() { None } else { Some(cleaned.into_owned()) }
}

pub fn titled_filename(stem: &str) -> String {
  format!("{}_anki.csv", stem)
}

/// Filename used when the page title is unavailable.
pub fn default_filename(video_id: Option<&str>) -> String {
  format!("anki_deck_{}.csv", video_id.unwrap_or(constants().fallback_id_token.as_str()))
}

/// One export action: built per click, dropped once the download settles.
#[derive(Debug, Clone)]
pub struct ExportRequest {
  pub tab_id: TabId,
  pub video_id: Option<String>,
  pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
  pub download_id: DownloadId,
  pub filename: String,
  pub cards: usize,
  /// Whether the filename came from the page title rather than the fallback.
  pub titled: bool,
  pub message: String,
}

/// An object URL that is revoked when dropped, whichever way the export ends.
struct ObjectUrl {
  blobs: Arc<dyn BlobStore>,
  url: String,
}

impl ObjectUrl {
  fn create(blobs: &Arc<dyn BlobStore>, content: String, mime: &str) -> Result<Self, ExportError> {
    let url = blobs.create(content, mime).map_err(ExportError::Blob)?;
    Ok(Self { blobs: Arc::clone(blobs), url })
  }
}

impl Drop for ObjectUrl {
  fn drop(&mut self) {
    self.blobs.revoke(&self.url);
  }
}

/// Transcript text to downloaded deck file.
///
/// Stages:
/// 1. Build the card rows and the CSV body
/// 2. Wrap the body in an object URL
/// 3. Derive a filename from the page title (non-fatal, falls back)
/// 4. Start the download, then revoke the object URL either way
pub struct ExportPipeline {
  tabs: Arc<dyn TabHost>,
  blobs: Arc<dyn BlobStore>,
  downloader: Arc<dyn Downloader>,
  save_as: bool,
  title_timeout: Duration,
}

impl ExportPipeline {
  pub fn new(tabs: Arc<dyn TabHost>, blobs: Arc<dyn BlobStore>, downloader: Arc<dyn Downloader>) -> Self {
    Self { tabs, blobs, downloader, save_as: true, title_timeout: constants().title_timeout() }
  }

  pub fn with_save_as(mut self, save_as: bool) -> Self {
    self.save_as = save_as;
    self
  }

  pub fn with_title_timeout(mut self, timeout: Duration) -> Self {
    self.title_timeout = timeout;
    self
  }

  pub async fn export(&self, request: ExportRequest) -> Result<ExportOutcome, ExportError> {
    let cards = deck::cards(&request.transcript);
    if cards.is_empty() {
      warn!(tab = request.tab_id, "export: transcript has no usable lines, deck will be header-only");
    }
    let csv = deck::render_csv(&cards);
    info!(tab = request.tab_id, cards = cards.len(), bytes = csv.len(), "export: deck generated");

    let blob = ObjectUrl::create(&self.blobs, csv, &constants().csv_mime)?;

    let (filename, titled) = match self.derive_filename(request.tab_id).await {
      Ok(filename) => (filename, true),
      Err(e) => {
        warn!(tab = request.tab_id, err = %e, "export: could not get video title, using default filename");
        (default_filename(request.video_id.as_deref()), false)
      }
    };

    let download = self
      .downloader
      .download(DownloadRequest { url: blob.url.clone(), filename: filename.clone(), save_as: self.save_as })
      .await;
    drop(blob);

    match download {
      Ok(download_id) => {
        info!(download_id, filename = %filename, "export: download started");
        let message =
          if titled { &constants().export_success_message } else { &constants().export_success_default_name_message };
        Ok(ExportOutcome { download_id, filename, cards: cards.len(), titled, message: message.clone() })
      }
      Err(e) => {
        error!(filename = %filename, err = %e, "export: download failed");
        Err(ExportError::Download(e))
      }
    }
  }

  async fn derive_filename(&self, tab_id: TabId) -> Result<String, TitleError> {
    let title = tokio::time::timeout(self.title_timeout, self.tabs.page_title(tab_id))
      .await
      .map_err(|_| TitleError::Timeout(self.title_timeout))??;
    clean_page_title(&title).map(|stem| titled_filename(&stem)).ok_or(TitleError::Empty)
  }
}
