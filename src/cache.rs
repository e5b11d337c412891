//! Session cache for video metadata.
//!
//! Read-through/write-through over a [`SessionStore`], keyed
//! `video_details_{id}`. Both directions are best-effort: a failed read is a
//! miss and a failed write is dropped. Entries are never invalidated within a
//! session. Concurrent writes of the same key are idempotent, last one wins.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::error::StoreError;
use crate::platform::SessionStore;
use crate::youtube::VideoMetadata;

#[derive(Clone)]
pub struct DetailsCache {
  store: Arc<dyn SessionStore>,
}

impl DetailsCache {
  pub fn new(store: Arc<dyn SessionStore>) -> Self {
    Self { store }
  }

  pub fn key(video_id: &str) -> String {
    format!("{}{}", constants().cache_key_prefix, video_id)
  }

  pub async fn get(&self, video_id: &str) -> Option<VideoMetadata> {
    match self.try_get(video_id).await {
      Ok(Some(details)) => {
        debug!(video_id, "cache: hit");
        Some(details)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(video_id, err = %e, "cache: read failed, treating as miss");
        None
      }
    }
  }

  /// Returns whether the entry was stored.
  pub async fn put(&self, video_id: &str, details: &VideoMetadata) -> bool {
    match self.try_put(video_id, details).await {
      Ok(()) => {
        debug!(video_id, "cache: stored");
        true
      }
      Err(e) => {
        warn!(video_id, err = %e, "cache: write failed, dropping entry");
        false
      }
    }
  }

  async fn try_get(&self, video_id: &str) -> Result<Option<VideoMetadata>, StoreError> {
    let key = Self::key(video_id);
    match self.store.get(&key).await? {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  async fn try_put(&self, video_id: &str, details: &VideoMetadata) -> Result<(), StoreError> {
    let key = Self::key(video_id);
    let value = serde_json::to_value(details)?;
    self.store.set(&key, value).await
  }
}
