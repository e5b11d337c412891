//! Seams to the host platform.
//!
//! Every host call is asynchronous and returns a `Result`. Traits hand back
//! boxed futures so implementations can sit behind `Arc<dyn ...>` and be
//! replaced by scripted fakes in tests.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{HostError, StoreError};

pub type TabId = u32;
pub type DownloadId = u64;

/// A browser tab as seen by the background components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
  pub id: TabId,
  pub url: Option<String>,
}

/// Session-scoped key/value storage. Values vanish when the session ends.
pub trait SessionStore: Send + Sync {
  fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

  fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;
}

pub trait TabHost: Send + Sync {
  /// The active tab of the current window, if any.
  fn active_tab(&self) -> BoxFuture<'_, Result<Option<Tab>, HostError>>;

  fn all_tabs(&self) -> BoxFuture<'_, Result<Vec<Tab>, HostError>>;

  fn tab(&self, id: TabId) -> BoxFuture<'_, Result<Tab, HostError>>;

  /// Read `document.title` from the tab's rendered page.
  fn page_title(&self, id: TabId) -> BoxFuture<'_, Result<String, HostError>>;
}

/// Per-tab visual indicator (toolbar icon).
pub trait Indicator: Send + Sync {
  fn set_active(&self, id: TabId, qualifying: bool) -> BoxFuture<'_, Result<(), HostError>>;
}

/// Transient in-memory representation of a file, addressable by URL.
pub trait BlobStore: Send + Sync {
  fn create(&self, content: String, mime: &str) -> Result<String, HostError>;

  fn revoke(&self, url: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
  pub url: String,
  pub filename: String,
  /// Prompt the user for a save location.
  pub save_as: bool,
}

pub trait Downloader: Send + Sync {
  fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Result<DownloadId, HostError>>;
}
