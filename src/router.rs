//! Background message protocol.
//!
//! The popup sends one tagged request and blocks until it gets one tagged
//! reply. Every request is answered, including when tab queries fail or the
//! handler task dies.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::constants::constants;
use crate::error::ExportError;
use crate::export::{ExportPipeline, ExportRequest};
use crate::platform::{Tab, TabHost, TabId};
use crate::transcript::TranscriptProvider;
use crate::watch;
use crate::youtube::{MetadataFetcher, VideoMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
  #[serde(rename = "getPopupData")]
  GetPopupData,
  #[serde(rename = "convertToAnki", alias = "requestExport")]
  ConvertToAnki,
}

/// Reply to [`Request::GetPopupData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PopupData {
  Success {
    #[serde(rename = "videoDetails")]
    video_details: VideoMetadata,
  },
  Error {
    error: String,
  },
  #[serde(alias = "not_youtube_video")]
  NotApplicable,
}

/// Reply to [`Request::ConvertToAnki`] and to requests that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReply {
  Success { message: String },
  Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
  Popup(PopupData),
  Status(StatusReply),
}

impl Response {
  /// The reply sent when a handler ends without answering.
  fn fallback(request: Request) -> Self {
    let message = "Background handler failed before replying.".to_string();
    match request {
      Request::GetPopupData => Response::Popup(PopupData::Error { error: message }),
      Request::ConvertToAnki => Response::Status(StatusReply::Error { message }),
    }
  }
}

/// Holds the reply channel and answers with a fallback if dropped unanswered,
/// including during a panic unwind.
struct ReplyGuard {
  reply: Option<oneshot::Sender<Response>>,
  request: Request,
}

impl ReplyGuard {
  fn send(mut self, response: Response) {
    if let Some(reply) = self.reply.take() {
      let _ = reply.send(response);
    }
  }
}

impl Drop for ReplyGuard {
  fn drop(&mut self) {
    if let Some(reply) = self.reply.take() {
      error!(request = ?self.request, "router: handler ended without a reply, sending fallback");
      let _ = reply.send(Response::fallback(self.request));
    }
  }
}

pub struct RequestRouter {
  tabs: Arc<dyn TabHost>,
  fetcher: MetadataFetcher,
  exporter: ExportPipeline,
  transcripts: Arc<dyn TranscriptProvider>,
}

impl RequestRouter {
  pub fn new(
    tabs: Arc<dyn TabHost>,
    fetcher: MetadataFetcher,
    exporter: ExportPipeline,
    transcripts: Arc<dyn TranscriptProvider>,
  ) -> Self {
    Self { tabs, fetcher, exporter, transcripts }
  }

  /// Handle `request` on its own task. The receiver always yields exactly one response.
  pub fn dispatch(self: &Arc<Self>, request: Request) -> oneshot::Receiver<Response> {
    let (tx, rx) = oneshot::channel();
    let router = Arc::clone(self);
    tokio::spawn(async move {
      let guard = ReplyGuard { reply: Some(tx), request };
      let response = router.handle(request).await;
      guard.send(response);
    });
    rx
  }

  /// Parse a raw JSON message and answer it. Malformed messages get an error reply.
  pub async fn dispatch_json(self: &Arc<Self>, raw: &str) -> Response {
    let request: Request = match serde_json::from_str(raw) {
      Ok(request) => request,
      Err(e) => {
        warn!(err = %e, "router: unrecognized message");
        return Response::Status(StatusReply::Error { message: format!("Unrecognized request: {}", e) });
      }
    };
    self.dispatch(request).await.unwrap_or_else(|_| Response::fallback(request))
  }

  pub async fn handle(&self, request: Request) -> Response {
    match request {
      Request::GetPopupData => Response::Popup(self.popup_data().await),
      Request::ConvertToAnki => Response::Status(self.convert().await),
    }
  }

  async fn popup_data(&self) -> PopupData {
    let tab = match self.tabs.active_tab().await {
      Ok(tab) => tab,
      Err(e) => {
        error!(err = %e, "router: error querying tabs for popup data");
        return PopupData::Error { error: constants().tab_query_failed_message.clone() };
      }
    };
    let Some((_, url)) = watch_tab(tab) else {
      return PopupData::NotApplicable;
    };

    match self.fetcher.fetch_details(&url).await {
      Ok(video_details) => PopupData::Success { video_details },
      Err(e) => {
        error!(url = %url, err = %e, "router: failed to get video details");
        PopupData::Error { error: e.to_string() }
      }
    }
  }

  async fn convert(&self) -> StatusReply {
    let tab = match self.tabs.active_tab().await {
      Ok(tab) => tab,
      Err(e) => {
        error!(err = %e, "router: error querying tabs for export");
        return StatusReply::Error { message: constants().tab_query_failed_message.clone() };
      }
    };
    let Some((tab_id, url)) = watch_tab(tab) else {
      info!("router: export requested outside a video page");
      return StatusReply::Error { message: constants().not_watch_page_message.clone() };
    };

    let video_id = watch::video_id(&url).ok();
    info!(video_id = ?video_id, tab = tab_id, "router: processing export");
    let lookup_id = video_id.as_deref().unwrap_or(constants().fallback_id_token.as_str());
    let transcript = match self.transcripts.transcript(lookup_id).await {
      Ok(text) => text,
      Err(e) => {
        let e = ExportError::from(e);
        error!(err = %e, "router: transcript unavailable");
        return StatusReply::Error { message: e.to_string() };
      }
    };

    match self.exporter.export(ExportRequest { tab_id, video_id, transcript }).await {
      Ok(outcome) => StatusReply::Success { message: outcome.message },
      Err(e) => StatusReply::Error { message: e.to_string() },
    }
  }
}

/// The tab's id and URL if it shows a watch page.
fn watch_tab(tab: Option<Tab>) -> Option<(TabId, String)> {
  let tab = tab?;
  let url = tab.url.filter(|url| watch::is_watch_page(url))?;
  Some((tab.id, url))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::DetailsCache;
  use crate::error::{FetchError, TranscriptError};
  use crate::export::tests::{MemoryBlobs, RecordingDownloader, ScriptedTabs, TitleScript};
  use crate::host::MemorySessionStore;
  use crate::platform::{BlobStore, Downloader};
  use crate::transcript::PlaceholderTranscript;
  use crate::youtube::tests::{MockOEmbed, WATCH_URL, sample};
  use futures::future::BoxFuture;
  use serde_json::json;

  struct PanickingTranscript;

  impl TranscriptProvider for PanickingTranscript {
    fn transcript<'a>(&'a self, _video_id: &'a str) -> BoxFuture<'a, Result<String, TranscriptError>> {
      Box::pin(async {
        let scraped: Option<String> = None;
        Ok(scraped.expect("caption scraper crashed"))
      })
    }
  }

  struct MissingTranscript;

  impl TranscriptProvider for MissingTranscript {
    fn transcript<'a>(&'a self, video_id: &'a str) -> BoxFuture<'a, Result<String, TranscriptError>> {
      Box::pin(async move {
        Err(TranscriptError::Unavailable { video_id: video_id.to_string(), reason: "captions disabled".into() })
      })
    }
  }

  struct Fixture {
    router: Arc<RequestRouter>,
    oembed: Arc<MockOEmbed>,
    downloader: Arc<RecordingDownloader>,
  }

  fn fixture(tabs: ScriptedTabs, oembed: MockOEmbed, transcripts: Arc<dyn TranscriptProvider>) -> Fixture {
    let tabs: Arc<dyn TabHost> = Arc::new(tabs);
    let oembed = Arc::new(oembed);
    let blobs = Arc::new(MemoryBlobs::default());
    let downloader = Arc::new(RecordingDownloader::new(Arc::clone(&blobs), false));
    let fetcher = MetadataFetcher::new(
      Arc::clone(&oembed) as Arc<dyn crate::youtube::OEmbedClient>,
      DetailsCache::new(Arc::new(MemorySessionStore::default())),
    );
    let exporter = ExportPipeline::new(
      Arc::clone(&tabs),
      blobs as Arc<dyn BlobStore>,
      Arc::clone(&downloader) as Arc<dyn Downloader>,
    );
    let router = Arc::new(RequestRouter::new(tabs, fetcher, exporter, transcripts));
    Fixture { router, oembed, downloader }
  }

  fn on_watch_page() -> Fixture {
    fixture(
      ScriptedTabs::on(WATCH_URL, TitleScript::Title("Never Gonna Give You Up - YouTube")),
      MockOEmbed::new(Ok(sample())),
      Arc::new(PlaceholderTranscript),
    )
  }

  #[test]
  fn wire_format() {
    let request: Request = serde_json::from_value(json!({"action": "getPopupData"})).unwrap();
    assert_eq!(request, Request::GetPopupData);
    let request: Request = serde_json::from_value(json!({"action": "requestExport"})).unwrap();
    assert_eq!(request, Request::ConvertToAnki);

    let popup = serde_json::to_value(Response::Popup(PopupData::Success { video_details: sample() })).unwrap();
    assert_eq!(popup["status"], "success");
    assert_eq!(popup["videoDetails"]["author_name"], "Rick Astley");
    let na = serde_json::to_value(Response::Popup(PopupData::NotApplicable)).unwrap();
    assert_eq!(na, json!({"status": "not_applicable"}));
    let err = serde_json::to_value(Response::Status(StatusReply::Error { message: "m".into() })).unwrap();
    assert_eq!(err, json!({"status": "error", "message": "m"}));
  }

  #[tokio::test]
  async fn popup_data_on_watch_page() {
    let f = on_watch_page();
    let response = f.router.dispatch(Request::GetPopupData).await.unwrap();
    let Response::Popup(PopupData::Success { video_details }) = response else { panic!("unexpected reply") };
    assert!(!video_details.title.is_empty());
    assert!(!video_details.author_name.is_empty());
  }

  #[tokio::test]
  async fn popup_data_when_endpoint_unreachable() {
    let f = fixture(
      ScriptedTabs::on(WATCH_URL, TitleScript::Fail),
      MockOEmbed::new(Err(FetchError::Network("connection refused".into()))),
      Arc::new(PlaceholderTranscript),
    );
    let response = f.router.dispatch(Request::GetPopupData).await.unwrap();
    let Response::Popup(PopupData::Error { error }) = response else { panic!("unexpected reply") };
    assert!(!error.is_empty());
  }

  #[tokio::test]
  async fn non_watch_page_is_not_applicable_and_export_refused() {
    let f = fixture(
      ScriptedTabs::on("https://www.youtube.com/results?search_query=rust", TitleScript::Fail),
      MockOEmbed::new(Ok(sample())),
      Arc::new(PlaceholderTranscript),
    );
    assert_eq!(f.router.dispatch(Request::GetPopupData).await.unwrap(), Response::Popup(PopupData::NotApplicable));
    assert_eq!(
      f.router.dispatch(Request::ConvertToAnki).await.unwrap(),
      Response::Status(StatusReply::Error { message: "Extension can only be used on a YouTube video page.".into() })
    );
    assert_eq!(f.oembed.call_count(), 0);
    assert!(f.downloader.seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn no_active_tab_is_not_applicable() {
    let mut tabs = ScriptedTabs::on(WATCH_URL, TitleScript::Fail);
    tabs.active = None;
    let f = fixture(tabs, MockOEmbed::new(Ok(sample())), Arc::new(PlaceholderTranscript));
    assert_eq!(f.router.dispatch(Request::GetPopupData).await.unwrap(), Response::Popup(PopupData::NotApplicable));
  }

  #[tokio::test]
  async fn tab_query_failure_still_answers() {
    let mut tabs = ScriptedTabs::on(WATCH_URL, TitleScript::Fail);
    tabs.query_fails = true;
    let f = fixture(tabs, MockOEmbed::new(Ok(sample())), Arc::new(PlaceholderTranscript));
    assert_eq!(
      f.router.dispatch(Request::GetPopupData).await.unwrap(),
      Response::Popup(PopupData::Error { error: "Could not get current tab info.".into() })
    );
    assert_eq!(
      f.router.dispatch(Request::ConvertToAnki).await.unwrap(),
      Response::Status(StatusReply::Error { message: "Could not get current tab info.".into() })
    );
  }

  #[tokio::test]
  async fn export_on_watch_page() {
    let f = on_watch_page();
    let response = f.router.dispatch(Request::ConvertToAnki).await.unwrap();
    assert_eq!(
      response,
      Response::Status(StatusReply::Success { message: "Anki deck CSV generated and download started.".into() })
    );
    let seen = f.downloader.seen.lock().unwrap();
    assert_eq!(seen[0].0.filename, "Never Gonna Give You Up_anki.csv");
    assert!(seen[0].1.contains("\"Line 4\",\"Final line.\""));
  }

  #[tokio::test]
  async fn export_title_failure_uses_fallback_name() {
    let f = fixture(
      ScriptedTabs::on(WATCH_URL, TitleScript::Fail),
      MockOEmbed::new(Ok(sample())),
      Arc::new(PlaceholderTranscript),
    );
    let response = f.router.dispatch(Request::ConvertToAnki).await.unwrap();
    assert!(matches!(response, Response::Status(StatusReply::Success { .. })));
    assert_eq!(f.downloader.seen.lock().unwrap()[0].0.filename, "anki_deck_dQw4w9WgXcQ.csv");
  }

  #[tokio::test]
  async fn panicking_handler_still_replies() {
    let f = fixture(
      ScriptedTabs::on(WATCH_URL, TitleScript::Fail),
      MockOEmbed::new(Ok(sample())),
      Arc::new(PanickingTranscript),
    );
    let response = f.router.dispatch(Request::ConvertToAnki).await.unwrap();
    assert!(matches!(response, Response::Status(StatusReply::Error { .. })));
  }

  #[tokio::test]
  async fn malformed_json_gets_error_reply() {
    let f = on_watch_page();
    let response = f.router.dispatch_json(r#"{"action":"launchRockets"}"#).await;
    assert!(matches!(response, Response::Status(StatusReply::Error { .. })));
    let response = f.router.dispatch_json(r#"{"action":"getPopupData"}"#).await;
    assert!(matches!(response, Response::Popup(PopupData::Success { .. })));
  }

  #[tokio::test]
  async fn missing_transcript_reports_export_error() {
    let f = fixture(
      ScriptedTabs::on(WATCH_URL, TitleScript::Fail),
      MockOEmbed::new(Ok(sample())),
      Arc::new(MissingTranscript),
    );
    let response = f.router.dispatch(Request::ConvertToAnki).await.unwrap();
    assert_eq!(
      response,
      Response::Status(StatusReply::Error {
        message: "Could not load transcript: transcript unavailable for dQw4w9WgXcQ: captions disabled".into()
      })
    );
    assert!(f.downloader.seen.lock().unwrap().is_empty());
  }
}
