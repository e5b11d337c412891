use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::{debug, error, info};
use url::Url;

use crate::cache::DetailsCache;
use crate::constants::constants;
use crate::error::FetchError;
use crate::watch;

/// The subset of oEmbed data kept for the popup preview. Everything else in
/// the response is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
  pub title: String,
  pub author_name: String,
  pub thumbnail_url: String,
}

/// One metadata lookup against the oEmbed endpoint.
pub trait OEmbedClient: Send + Sync {
  fn fetch<'a>(&'a self, video_url: &'a str) -> BoxFuture<'a, Result<VideoMetadata, FetchError>>;
}

/// oEmbed over HTTP via reqwest.
pub struct HttpOEmbed {
  client: Client,
  endpoint: String,
}

impl HttpOEmbed {
  pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
    Self { client, endpoint: endpoint.into() }
  }

  /// The endpoint with `url` and `format` appended to any query it already has.
  pub fn request_url(&self, video_url: &str) -> Result<Url, FetchError> {
    let mut url =
      Url::parse(&self.endpoint).map_err(|e| FetchError::Network(format!("invalid oEmbed endpoint {}: {}", self.endpoint, e)))?;
    url.query_pairs_mut().append_pair("url", video_url).append_pair("format", "json");
    Ok(url)
  }
}

impl OEmbedClient for HttpOEmbed {
  fn fetch<'a>(&'a self, video_url: &'a str) -> BoxFuture<'a, Result<VideoMetadata, FetchError>> {
    Box::pin(async move {
      let url = self.request_url(video_url)?;
      info!(url = %url, "oembed: fetching");

      let response = self
        .client
        .get(url)
        .timeout(constants().fetch_timeout())
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "oembed: fetch failed");
        return Err(FetchError::from_status(status.as_u16()));
      }

      let details: VideoMetadata = response.json().await.map_err(|e| FetchError::Parse(e.to_string()))?;
      debug!(title = %details.title, author = %details.author_name, "oembed: data received");
      Ok(details)
    })
  }
}

type SharedFetch = Shared<BoxFuture<'static, Result<VideoMetadata, FetchError>>>;

/// Cached metadata lookup with single-flight de-duplication: concurrent misses
/// for the same video share one request.
#[derive(Clone)]
pub struct MetadataFetcher {
  client: Arc<dyn OEmbedClient>,
  cache: DetailsCache,
  in_flight: Arc<StdMutex<HashMap<String, SharedFetch>>>,
}

impl MetadataFetcher {
  pub fn new(client: Arc<dyn OEmbedClient>, cache: DetailsCache) -> Self {
    Self { client, cache, in_flight: Arc::new(StdMutex::new(HashMap::new())) }
  }

  pub async fn fetch_details(&self, video_url: &str) -> Result<VideoMetadata, FetchError> {
    let video_id = watch::video_id(video_url)?;

    if let Some(details) = self.cache.get(&video_id).await {
      info!(video_id = %video_id, "fetch: retrieved details from cache");
      return Ok(details);
    }

    let fetch = self.join_or_start(&video_id, video_url);
    let result = fetch.clone().await;

    // Never held across an await.
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if in_flight.get(&video_id).is_some_and(|f| f.ptr_eq(&fetch)) {
      in_flight.remove(&video_id);
    }
    result
  }

  fn join_or_start(&self, video_id: &str, video_url: &str) -> SharedFetch {
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = in_flight.get(video_id) {
      debug!(video_id, "fetch: joining in-flight request");
      return existing.clone();
    }

    let client = Arc::clone(&self.client);
    let cache = self.cache.clone();
    let video_id = video_id.to_string();
    let video_url = video_url.to_string();
    let key = video_id.clone();

    let fetch = async move {
      let details = client.fetch(&video_url).await?;
      cache.put(&video_id, &details).await;
      Ok::<_, FetchError>(details)
    }
    .boxed()
    .shared();

    in_flight.insert(key, fetch.clone());
    fetch
  }
}
