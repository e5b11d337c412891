use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::constants::constants;
use crate::error::FetchError;

/// Compiled watch-page pattern shared by the navigation watcher and the router.
static WATCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  // Safety: the pattern comes from the embedded constants.ron and is covered by tests.
  Regex::new(&constants().watch_pattern).expect("watch_pattern in constants.ron must be a valid regex")
});

/// Whether `url` points at a single playable video.
pub fn is_watch_page(url: &str) -> bool {
  WATCH_PATTERN.is_match(url)
}

/// Extract the VideoIdentifier from a watch-page URL's query string.
/// An empty or missing parameter is an [`FetchError::InvalidUrl`].
pub fn video_id(video_url: &str) -> Result<String, FetchError> {
  let url = Url::parse(video_url).map_err(|_| FetchError::InvalidUrl)?;
  let param = constants().video_id_param.as_str();
  url
    .query_pairs()
    .find(|(k, _)| k == param)
    .map(|(_, v)| v.into_owned())
    .filter(|v| !v.is_empty())
    .ok_or(FetchError::InvalidUrl)
}
