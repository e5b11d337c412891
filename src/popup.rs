use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::constants::constants;
use crate::router::{PopupData, Request, RequestRouter, Response, StatusReply};
use crate::youtube::VideoMetadata;

/// Where the popup sends its requests.
pub trait Background {
  fn send(&self, request: Request) -> oneshot::Receiver<Response>;
}

impl Background for Arc<RequestRouter> {
  fn send(&self, request: Request) -> oneshot::Receiver<Response> {
    self.dispatch(request)
  }
}

/// Preview state. Starts at `Loading` and settles exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
  Loading,
  Loaded(VideoMetadata),
  Error(String),
  NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
  Neutral,
  Success,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
  pub text: String,
  pub class: StatusClass,
}

impl StatusLine {
  fn neutral(text: impl Into<String>) -> Self {
    Self { text: text.into(), class: StatusClass::Neutral }
  }
}

/// Popup-side controller: renders the preview from the background's reply and
/// runs the export button sub-flow.
pub struct PreviewController<B: Background> {
  background: B,
  pub state: PreviewState,
  pub status: Option<StatusLine>,
  /// Export in progress; the button is disabled meanwhile.
  pub busy: bool,
  preview_rx: Option<oneshot::Receiver<Response>>,
  export_rx: Option<oneshot::Receiver<Response>>,
}

impl<B: Background> PreviewController<B> {
  /// Open the popup: enter `Loading` and ask the background for preview data.
  pub fn open(background: B) -> Self {
    let preview_rx = Some(background.send(Request::GetPopupData));
    Self { background, state: PreviewState::Loading, status: None, busy: false, preview_rx, export_rx: None }
  }

  /// The export button is shown only once the preview has loaded.
  pub fn button_visible(&self) -> bool {
    matches!(self.state, PreviewState::Loaded(_))
  }

  pub fn button_enabled(&self) -> bool {
    self.button_visible() && !self.busy
  }

  /// Apply any replies that have arrived without waiting.
  pub fn check_pending(&mut self) {
    if let Some(mut rx) = self.preview_rx.take() {
      match rx.try_recv() {
        Ok(response) => self.settle_preview(Some(response)),
        Err(oneshot::error::TryRecvError::Empty) => self.preview_rx = Some(rx),
        Err(oneshot::error::TryRecvError::Closed) => self.settle_preview(None),
      }
    }

    if let Some(mut rx) = self.export_rx.take() {
      match rx.try_recv() {
        Ok(response) => self.finish_export(Some(response)),
        Err(oneshot::error::TryRecvError::Empty) => self.export_rx = Some(rx),
        Err(oneshot::error::TryRecvError::Closed) => self.finish_export(None),
      }
    }
  }

  /// Wait for every outstanding reply.
  pub async fn wait(&mut self) {
    if let Some(rx) = self.preview_rx.take() {
      self.settle_preview(rx.await.ok());
    }
    if let Some(rx) = self.export_rx.take() {
      self.finish_export(rx.await.ok());
    }
  }

  /// Export button click. Ignored while the button is hidden or disabled.
  pub fn trigger_export(&mut self) -> bool {
    if !self.button_enabled() {
      debug!(state = ?self.state, busy = self.busy, "popup: export click ignored");
      return false;
    }
    self.status = Some(StatusLine::neutral("Processing..."));
    self.busy = true;
    self.export_rx = Some(self.background.send(Request::ConvertToAnki));
    true
  }

  fn settle_preview(&mut self, response: Option<Response>) {
    if self.state != PreviewState::Loading {
      warn!(state = ?self.state, "popup: preview already settled, ignoring reply");
      return;
    }
    self.state = match response {
      Some(Response::Popup(PopupData::Success { video_details })) => PreviewState::Loaded(video_details),
      Some(Response::Popup(PopupData::Error { error })) => PreviewState::Error(error),
      Some(Response::Popup(PopupData::NotApplicable)) => {
        self.status = Some(StatusLine::neutral(constants().open_video_message.clone()));
        PreviewState::NotApplicable
      }
      Some(other) => {
        error!(response = ?other, "popup: unexpected reply to preview request");
        PreviewState::Error("Invalid response from background.".to_string())
      }
      None => {
        error!("popup: background dropped the preview request");
        PreviewState::Error("Error: The message port closed before a response was received.".to_string())
      }
    };
  }

  fn finish_export(&mut self, response: Option<Response>) {
    self.busy = false;
    self.status = Some(match response {
      Some(Response::Status(StatusReply::Success { message })) => StatusLine { text: message, class: StatusClass::Success },
      Some(Response::Status(StatusReply::Error { message })) => StatusLine { text: message, class: StatusClass::Error },
      Some(other) => {
        error!(response = ?other, "popup: unexpected reply to export request");
        StatusLine { text: "Error: Invalid response from background.".to_string(), class: StatusClass::Error }
      }
      None => {
        error!("popup: no response received from background");
        StatusLine { text: "Error: No response from background.".to_string(), class: StatusClass::Error }
      }
    });
  }

  /// Plain-text rendering of the popup.
  pub fn render(&self) -> String {
    let mut out = String::new();
    match &self.state {
      PreviewState::Loading => out.push_str("Loading video info…\n"),
      PreviewState::Loaded(details) => {
        let title = if details.title.is_empty() { "N/A" } else { details.title.as_str() };
        let channel = if details.author_name.is_empty() { "N/A" } else { details.author_name.as_str() };
        let _ = writeln!(out, "Title:     {}", title);
        let _ = writeln!(out, "Channel:   {}", channel);
        let _ = writeln!(out, "Thumbnail: {}", details.thumbnail_url);
      }
      PreviewState::Error(message) => {
        let _ = writeln!(out, "Error loading video info: {}", message);
      }
      PreviewState::NotApplicable => {}
    }
    if self.button_visible() {
      let label = if self.busy { "[ Convert to Anki … ]" } else { "[ Convert to Anki ]" };
      let _ = writeln!(out, "{}", label);
    }
    if let Some(status) = &self.status {
      let marker = match status.class {
        StatusClass::Neutral => "",
        StatusClass::Success => "✓ ",
        StatusClass::Error => "✗ ",
      };
      let _ = writeln!(out, "{}{}", marker, status.text);
    }
    out
  }
}
