//! Command-line implementations of the host seams.
//!
//! The binary stands in for the browser: a fixed list of tabs, an in-process
//! session store, temp files as object URLs and a directory as the download
//! target.

use futures::future::BoxFuture;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
use tracing::{debug, info};

use crate::constants::constants;
use crate::error::{HostError, StoreError};
use crate::platform::{BlobStore, DownloadId, DownloadRequest, Downloader, Indicator, SessionStore, Tab, TabHost, TabId};

// --- Session storage ---

/// Session storage that lives as long as the process.
#[derive(Default)]
pub struct MemorySessionStore {
  entries: StdMutex<HashMap<String, Value>>,
}

impl MemorySessionStore {
  pub fn keys(&self) -> Vec<String> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    let mut keys: Vec<String> = entries.keys().cloned().collect();
    keys.sort();
    keys
  }
}

impl SessionStore for MemorySessionStore {
  fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
    Box::pin(async move {
      let entries = self.entries.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
      Ok(entries.get(key).cloned())
    })
  }

  fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
    Box::pin(async move {
      let mut entries = self.entries.lock().map_err(|e| StoreError::Unavailable(e.to_string()))?;
      entries.insert(key.to_string(), value);
      Ok(())
    })
  }
}

// --- Tabs ---

/// Pull the document title out of raw page HTML, with character references decoded.
pub fn extract_title(html: &str) -> Option<String> {
  let document = Html::parse_document(html);
  let selector = Selector::parse("title").ok()?;
  let raw: String = document.select(&selector).next()?.text().collect();
  let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
  if title.is_empty() { None } else { Some(title) }
}

/// A window of tabs opened from the command line. The most recently opened
/// tab is the active one. Page titles are read by fetching the page.
pub struct CliTabHost {
  client: Client,
  tabs: StdMutex<Vec<Tab>>,
  active: StdMutex<Option<TabId>>,
}

impl CliTabHost {
  pub fn new(client: Client) -> Self {
    Self { client, tabs: StdMutex::new(Vec::new()), active: StdMutex::new(None) }
  }

  /// Open `url` in a new tab and focus it.
  pub fn open(&self, url: &str) -> TabId {
    let mut tabs = self.tabs.lock().unwrap_or_else(|e| e.into_inner());
    let id = tabs.iter().map(|t| t.id).max().unwrap_or(0) + 1;
    tabs.push(Tab { id, url: Some(url.to_string()) });
    *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    id
  }

  fn find(&self, id: TabId) -> Result<Tab, HostError> {
    let tabs = self.tabs.lock().map_err(|e| HostError::TabQuery(e.to_string()))?;
    tabs.iter().find(|t| t.id == id).cloned().ok_or(HostError::NoSuchTab(id))
  }
}

impl TabHost for CliTabHost {
  fn active_tab(&self) -> BoxFuture<'_, Result<Option<Tab>, HostError>> {
    Box::pin(async move {
      let active = *self.active.lock().map_err(|e| HostError::TabQuery(e.to_string()))?;
      match active {
        Some(id) => self.find(id).map(Some),
        None => Ok(None),
      }
    })
  }

  fn all_tabs(&self) -> BoxFuture<'_, Result<Vec<Tab>, HostError>> {
    Box::pin(async move {
      let tabs = self.tabs.lock().map_err(|e| HostError::TabQuery(e.to_string()))?;
      Ok(tabs.clone())
    })
  }

  fn tab(&self, id: TabId) -> BoxFuture<'_, Result<Tab, HostError>> {
    Box::pin(async move { self.find(id) })
  }

  fn page_title(&self, id: TabId) -> BoxFuture<'_, Result<String, HostError>> {
    Box::pin(async move {
      let tab = self.find(id)?;
      let url = tab.url.ok_or_else(|| HostError::Injection("tab has no document".into()))?;
      let response = self.client.get(&url).send().await.map_err(|e| HostError::Injection(e.to_string()))?;
      if !response.status().is_success() {
        return Err(HostError::Injection(format!("page returned {}", response.status())));
      }
      let html = response.text().await.map_err(|e| HostError::Injection(e.to_string()))?;
      extract_title(&html).ok_or_else(|| HostError::Injection("document has no title".into()))
    })
  }
}

// --- Indicator ---

/// Reports indicator changes in the log instead of repainting an icon.
pub struct LogIndicator;

impl Indicator for LogIndicator {
  fn set_active(&self, id: TabId, qualifying: bool) -> BoxFuture<'_, Result<(), HostError>> {
    Box::pin(async move {
      let icon = if qualifying { "icons/icon48.png" } else { "icons/icon48-grey.png" };
      debug!(tab = id, qualifying, icon, "indicator: updated");
      Ok(())
    })
  }
}

// --- Blobs ---

/// Object URLs backed by files in the temp directory. Revoking deletes the file.
pub struct TempBlobStore {
  dir: PathBuf,
  counter: AtomicU64,
}

impl TempBlobStore {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir, counter: AtomicU64::new(0) }
  }
}

impl Default for TempBlobStore {
  fn default() -> Self {
    Self::new(std::env::temp_dir())
  }
}

impl BlobStore for TempBlobStore {
  fn create(&self, content: String, mime: &str) -> Result<String, HostError> {
    let n = self.counter.fetch_add(1, Ordering::SeqCst);
    let path = self.dir.join(format!("tubecards-{}-{}.blob", std::process::id(), n));
    std::fs::write(&path, content)?;
    debug!(path = %path.display(), mime, "blob: created");
    Ok(path.to_string_lossy().into_owned())
  }

  fn revoke(&self, url: &str) {
    match std::fs::remove_file(url) {
      Ok(()) => debug!(url, "blob: revoked"),
      Err(e) => debug!(url, err = %e, "blob: revoke found nothing to remove"),
    }
  }
}

// --- Downloads ---

/// Strip path separators and reserved characters from a suggested filename.
fn safe_filename(name: &str) -> String {
  let cleaned: String =
    name.chars().map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c }).collect();
  let cleaned = cleaned.trim().trim_start_matches('.').to_string();
  if cleaned.is_empty() { format!("anki_deck_{}.csv", constants().fallback_id_token) } else { cleaned }
}

/// First free path for `filename` in `dir`, adding ` (n)` before the extension on conflict.
fn unique_path(dir: &Path, filename: &str) -> PathBuf {
  let candidate = dir.join(filename);
  if !candidate.exists() {
    return candidate;
  }
  let (stem, ext) = match filename.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
    _ => (filename, None),
  };
  (1..)
    .map(|n| match ext {
      Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
      None => dir.join(format!("{} ({})", stem, n)),
    })
    .find(|p| !p.exists())
    .unwrap_or(candidate)
}

/// Saves downloads into a directory. With `interactive` set, a `save_as`
/// request asks on the terminal for the target path first.
pub struct DirDownloader {
  dir: PathBuf,
  interactive: bool,
  next_id: AtomicU64,
  saved: StdMutex<Vec<PathBuf>>,
}

impl DirDownloader {
  pub fn new(dir: PathBuf, interactive: bool) -> Self {
    let interactive = interactive && std::io::stdin().is_terminal();
    Self { dir, interactive, next_id: AtomicU64::new(1), saved: StdMutex::new(Vec::new()) }
  }

  pub fn last_saved(&self) -> Option<PathBuf> {
    self.saved.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
  }

  async fn prompt_path(&self, suggested: &Path) -> Result<PathBuf, HostError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("Save as [{}]: ", suggested.display()).as_bytes()).await?;
    stdout.flush().await?;
    let mut line = String::new();
    TokioBufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let line = line.trim();
    Ok(if line.is_empty() { suggested.to_path_buf() } else { PathBuf::from(line) })
  }
}

impl Downloader for DirDownloader {
  fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Result<DownloadId, HostError>> {
    Box::pin(async move {
      tokio::fs::create_dir_all(&self.dir)
        .await
        .map_err(|e| HostError::Download(format!("cannot create {}: {}", self.dir.display(), e)))?;

      let mut target = unique_path(&self.dir, &safe_filename(&request.filename));
      if request.save_as && self.interactive {
        target = self.prompt_path(&target).await?;
      }

      tokio::fs::copy(&request.url, &target)
        .await
        .map_err(|e| HostError::Download(format!("cannot write {}: {}", target.display(), e)))?;

      let id = self.next_id.fetch_add(1, Ordering::SeqCst);
      info!(id, path = %target.display(), "download: saved");
      self.saved.lock().unwrap_or_else(|e| e.into_inner()).push(target);
      Ok(id)
    })
  }
}
