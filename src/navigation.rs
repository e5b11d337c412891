use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HostError;
use crate::platform::{Indicator, Tab, TabHost, TabId};
use crate::watch;
use crate::youtube::MetadataFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
  Loading,
  Complete,
}

/// What changed in a tab update event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabChange {
  pub url: Option<String>,
  pub status: Option<LoadStatus>,
}

impl TabChange {
  /// The URL to classify: the new URL if it changed, else the tab URL once loading completes.
  pub fn effective_url<'a>(&'a self, tab: &'a Tab) -> Option<&'a str> {
    self.url.as_deref().or_else(|| match self.status {
      Some(LoadStatus::Complete) => tab.url.as_deref(),
      _ => None,
    })
  }
}

/// Keeps the per-tab indicator in sync and prefetches metadata when a tab
/// navigates to a watch page. Prefetch outcomes never reach the user.
pub struct NavigationWatcher {
  fetcher: MetadataFetcher,
  tabs: Arc<dyn TabHost>,
  indicator: Arc<dyn Indicator>,
}

impl NavigationWatcher {
  pub fn new(fetcher: MetadataFetcher, tabs: Arc<dyn TabHost>, indicator: Arc<dyn Indicator>) -> Self {
    Self { fetcher, tabs, indicator }
  }

  /// Tab update event. Returns the prefetch task when one was started.
  pub async fn on_updated(&self, tab_id: TabId, change: &TabChange, tab: &Tab) -> Option<JoinHandle<()>> {
    let url = change.effective_url(tab)?.to_string();
    if !self.paint(tab_id, &url).await {
      return None;
    }

    info!(url = %url, "navigation: prefetching details for video");
    let fetcher = self.fetcher.clone();
    Some(tokio::spawn(async move {
      if let Err(e) = fetcher.fetch_details(&url).await {
        warn!(url = %url, err = %e, "navigation: background prefetch failed");
      }
    }))
  }

  /// Tab activation event. Repaints only, never prefetches.
  pub async fn on_activated(&self, tab_id: TabId) {
    match self.tabs.tab(tab_id).await {
      Ok(Tab { id, url: Some(url) }) => {
        self.paint(id, &url).await;
      }
      Ok(_) => {}
      Err(e) => debug!(tab = tab_id, err = %e, "navigation: activated tab unavailable"),
    }
  }

  /// Browser startup: repaint the active tab.
  pub async fn on_startup(&self) {
    match self.tabs.active_tab().await {
      Ok(Some(Tab { id, url: Some(url) })) => {
        self.paint(id, &url).await;
      }
      Ok(_) => {}
      Err(e) => warn!(err = %e, "navigation: could not query active tab on startup"),
    }
  }

  /// Install or update: repaint every open tab.
  pub async fn on_installed(&self) {
    let tabs = match self.tabs.all_tabs().await {
      Ok(tabs) => tabs,
      Err(e) => {
        warn!(err = %e, "navigation: could not enumerate tabs on install");
        return;
      }
    };
    for tab in tabs {
      if let Some(url) = tab.url {
        self.paint(tab.id, &url).await;
      }
    }
  }

  /// Classify `url` and update the tab's indicator. Returns whether it is a watch page.
  async fn paint(&self, tab_id: TabId, url: &str) -> bool {
    let qualifying = watch::is_watch_page(url);
    match self.indicator.set_active(tab_id, qualifying).await {
      Ok(()) | Err(HostError::NoSuchTab(_)) => {}
      Err(e) => warn!(tab = tab_id, err = %e, "navigation: error setting indicator"),
    }
    qualifying
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::DetailsCache;
  use crate::error::FetchError;
  use crate::export::tests::{ScriptedTabs, TitleScript};
  use crate::host::MemorySessionStore;
  use crate::youtube::tests::{MockOEmbed, WATCH_URL, sample};
  use futures::future::BoxFuture;
  use std::sync::Mutex as StdMutex;

  #[derive(Default)]
  struct RecordingIndicator {
    calls: StdMutex<Vec<(TabId, bool)>>,
  }

  impl Indicator for RecordingIndicator {
    fn set_active(&self, id: TabId, qualifying: bool) -> BoxFuture<'_, Result<(), HostError>> {
      self.calls.lock().unwrap().push((id, qualifying));
      Box::pin(async { Ok(()) })
    }
  }

  /// Indicator whose repaint always fails with a fixed error.
  struct FailingIndicator {
    gone: bool,
    calls: StdMutex<usize>,
  }

  impl Indicator for FailingIndicator {
    fn set_active(&self, id: TabId, _qualifying: bool) -> BoxFuture<'_, Result<(), HostError>> {
      *self.calls.lock().unwrap() += 1;
      let gone = self.gone;
      Box::pin(async move {
        if gone { Err(HostError::NoSuchTab(id)) } else { Err(HostError::Download("icon missing".into())) }
      })
    }
  }

  fn watcher(mock: Arc<MockOEmbed>, tabs: ScriptedTabs) -> (NavigationWatcher, Arc<RecordingIndicator>, DetailsCache) {
    let cache = DetailsCache::new(Arc::new(MemorySessionStore::default()));
    let indicator = Arc::new(RecordingIndicator::default());
    let fetcher = MetadataFetcher::new(mock, cache.clone());
    let watcher = NavigationWatcher::new(fetcher, Arc::new(tabs), Arc::clone(&indicator) as Arc<dyn Indicator>);
    (watcher, indicator, cache)
  }

  fn tab(url: &str) -> Tab {
    Tab { id: 7, url: Some(url.to_string()) }
  }

  #[test]
  fn effective_url_rules() {
    let t = tab("https://old.example/");
    let changed = TabChange { url: Some("https://new.example/".into()), status: None };
    assert_eq!(changed.effective_url(&t), Some("https://new.example/"));
    let complete = TabChange { url: None, status: Some(LoadStatus::Complete) };
    assert_eq!(complete.effective_url(&t), Some("https://old.example/"));
    let loading = TabChange { url: None, status: Some(LoadStatus::Loading) };
    assert_eq!(loading.effective_url(&t), None);
  }

  #[tokio::test]
  async fn watch_page_navigation_prefetches_into_cache() {
    let mock = Arc::new(MockOEmbed::new(Ok(sample())));
    let (watcher, indicator, cache) = watcher(Arc::clone(&mock), ScriptedTabs::on(WATCH_URL, TitleScript::Fail));
    let change = TabChange { url: Some(WATCH_URL.into()), status: None };

    let handle = watcher.on_updated(7, &change, &tab(WATCH_URL)).await.expect("prefetch started");
    handle.await.unwrap();

    assert_eq!(mock.call_count(), 1);
    assert_eq!(cache.get("dQw4w9WgXcQ").await, Some(sample()));
    assert_eq!(*indicator.calls.lock().unwrap(), vec![(7, true)]);
  }

  #[tokio::test]
  async fn other_pages_only_repaint() {
    let mock = Arc::new(MockOEmbed::new(Ok(sample())));
    let (watcher, indicator, _) = watcher(Arc::clone(&mock), ScriptedTabs::on(WATCH_URL, TitleScript::Fail));
    let change = TabChange { url: Some("https://www.youtube.com/feed".into()), status: None };

    assert!(watcher.on_updated(7, &change, &tab("https://www.youtube.com/feed")).await.is_none());
    assert_eq!(mock.call_count(), 0);
    assert_eq!(*indicator.calls.lock().unwrap(), vec![(7, false)]);
  }

  #[tokio::test]
  async fn prefetch_errors_are_swallowed() {
    let mock = Arc::new(MockOEmbed::new(Err(FetchError::Network("offline".into()))));
    let (watcher, _, _) = watcher(Arc::clone(&mock), ScriptedTabs::on(WATCH_URL, TitleScript::Fail));
    let change = TabChange { url: Some(WATCH_URL.into()), status: None };
    let handle = watcher.on_updated(7, &change, &tab(WATCH_URL)).await.unwrap();
    assert!(handle.await.is_ok());
  }

  #[tokio::test]
  async fn activation_repaints_without_prefetch() {
    let mock = Arc::new(MockOEmbed::new(Ok(sample())));
    let (watcher, indicator, _) = watcher(Arc::clone(&mock), ScriptedTabs::on(WATCH_URL, TitleScript::Fail));
    watcher.on_activated(7).await;
    watcher.on_activated(99).await;
    watcher.on_startup().await;
    watcher.on_installed().await;
    assert_eq!(mock.call_count(), 0);
    assert_eq!(*indicator.calls.lock().unwrap(), vec![(7, true), (7, true), (7, true)]);
  }

  #[tokio::test]
  async fn indicator_failure_does_not_block_prefetch() {
    for gone in [true, false] {
      let mock = Arc::new(MockOEmbed::new(Ok(sample())));
      let cache = DetailsCache::new(Arc::new(MemorySessionStore::default()));
      let indicator = Arc::new(FailingIndicator { gone, calls: StdMutex::new(0) });
      let watcher = NavigationWatcher::new(
        MetadataFetcher::new(Arc::clone(&mock) as Arc<dyn crate::youtube::OEmbedClient>, cache.clone()),
        Arc::new(ScriptedTabs::on(WATCH_URL, TitleScript::Fail)),
        Arc::clone(&indicator) as Arc<dyn Indicator>,
      );
      let change = TabChange { url: Some(WATCH_URL.into()), status: None };

      let handle = watcher.on_updated(7, &change, &tab(WATCH_URL)).await.expect("prefetch started");
      handle.await.unwrap();

      assert_eq!(*indicator.calls.lock().unwrap(), 1);
      assert_eq!(mock.call_count(), 1);
      assert_eq!(cache.get("dQw4w9WgXcQ").await, Some(sample()));
    }
  }
}
