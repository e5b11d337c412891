mod cache;
mod config;
mod constants;
mod deck;
mod error;
mod export;
mod host;
mod logging;
mod navigation;
mod platform;
mod popup;
mod router;
mod transcript;
mod watch;
mod youtube;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cache::DetailsCache;
use config::Config;
use export::ExportPipeline;
use host::{CliTabHost, DirDownloader, LogIndicator, MemorySessionStore, TempBlobStore};
use navigation::{LoadStatus, NavigationWatcher, TabChange};
use platform::Tab;
use popup::{PreviewController, PreviewState, StatusClass};
use router::RequestRouter;
use transcript::{FileTranscript, PlaceholderTranscript, TranscriptProvider};
use youtube::{HttpOEmbed, MetadataFetcher, OEmbedClient};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Log level for this tool: 'error', 'warn', 'info', 'debug' or 'trace' (RUST_LOG wins when set)
  #[arg(long, global = true)]
  log_level: Option<String>,

  /// oEmbed endpoint to query instead of YouTube's
  #[arg(long, global = true)]
  endpoint: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Open the popup on a page and print the video preview
  Preview { url: String },
  /// Open the popup on a page and export the transcript as an Anki CSV deck
  Export {
    url: String,
    /// Read the transcript from this file instead of the placeholder text
    #[arg(long)]
    transcript: Option<PathBuf>,
    /// Directory to save the deck into
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Save with the suggested name without asking
    #[arg(long)]
    no_prompt: bool,
  },
  /// Navigate tabs to each URL and report what was prefetched
  Watch {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Answer JSON requests from stdin, one per line
  Serve {
    /// Active tab URL (no tab when omitted)
    #[arg(long)]
    tab: Option<String>,
    #[arg(long)]
    transcript: Option<PathBuf>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
  },
  /// Show or update saved preferences (--endpoint and --log-level are saved too)
  Prefs {
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    save_as: Option<bool>,
  },
}

// --- Session ---

/// Everything the background keeps alive for one browser session.
struct Session {
  tabs: Arc<CliTabHost>,
  store: Arc<MemorySessionStore>,
  cache: DetailsCache,
  watcher: NavigationWatcher,
  router: Arc<RequestRouter>,
  downloads: Arc<DirDownloader>,
}

struct SessionOptions {
  endpoint: String,
  out_dir: PathBuf,
  save_as: bool,
  title_timeout: Duration,
  transcripts: Arc<dyn TranscriptProvider>,
}

impl Session {
  fn start(options: SessionOptions) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("tubecards/", env!("CARGO_PKG_VERSION")))
      .build()
      .context("Failed to build HTTP client")?;
    let oembed = Arc::new(HttpOEmbed::new(client.clone(), options.endpoint.clone()));
    Ok(Self::with_oembed(client, oembed, options))
  }

  fn with_oembed(client: reqwest::Client, oembed: Arc<dyn OEmbedClient>, options: SessionOptions) -> Self {
    let tabs = Arc::new(CliTabHost::new(client));
    let store = Arc::new(MemorySessionStore::default());
    let cache = DetailsCache::new(store.clone());
    let fetcher = MetadataFetcher::new(oembed, cache.clone());
    let watcher = NavigationWatcher::new(fetcher.clone(), tabs.clone(), Arc::new(LogIndicator));
    let downloads = Arc::new(DirDownloader::new(options.out_dir, options.save_as));
    let exporter = ExportPipeline::new(tabs.clone(), Arc::new(TempBlobStore::default()), downloads.clone())
      .with_save_as(options.save_as)
      .with_title_timeout(options.title_timeout);
    let router = Arc::new(RequestRouter::new(tabs.clone(), fetcher, exporter, options.transcripts));

    Self { tabs, store, cache, watcher, router, downloads }
  }

  /// Browser startup followed by the install pass over every open tab.
  async fn boot(&self) {
    self.watcher.on_startup().await;
    self.watcher.on_installed().await;
  }

  /// Open `url` in a new focused tab: activation, the URL change while
  /// loading, then load completion. Returns the prefetches started.
  async fn navigate(&self, url: &str) -> Vec<JoinHandle<()>> {
    let id = self.tabs.open(url);
    self.watcher.on_activated(id).await;
    let tab = Tab { id, url: Some(url.to_string()) };
    let changes = [
      TabChange { url: Some(url.to_string()), status: Some(LoadStatus::Loading) },
      TabChange { url: None, status: Some(LoadStatus::Complete) },
    ];
    let mut prefetches = Vec::new();
    for change in &changes {
      prefetches.extend(self.watcher.on_updated(id, change, &tab).await);
    }
    prefetches
  }

  /// Boot, then navigate to the starting tab if there is one.
  async fn boot_with_tab(&self, url: Option<&str>) -> Vec<JoinHandle<()>> {
    self.boot().await;
    match url {
      Some(url) => self.navigate(url).await,
      None => Vec::new(),
    }
  }
}

fn transcripts(path: Option<PathBuf>) -> Arc<dyn TranscriptProvider> {
  match path {
    Some(path) => Arc::new(FileTranscript { path }),
    None => Arc::new(PlaceholderTranscript),
  }
}

// --- Commands ---

async fn preview(session: &Session, url: &str) -> Result<()> {
  session.navigate(url).await;
  let mut popup = PreviewController::open(Arc::clone(&session.router));
  loop {
    popup.check_pending();
    if popup.state != PreviewState::Loading {
      break;
    }
    tokio::time::sleep(Duration::from_millis(16)).await;
  }
  print!("{}", popup.render());
  Ok(())
}

async fn export(session: &Session, url: &str) -> Result<()> {
  session.navigate(url).await;
  let mut popup = PreviewController::open(Arc::clone(&session.router));
  popup.wait().await;
  print!("{}", popup.render());

  if !popup.trigger_export() {
    bail!("Nothing to export on {}", url);
  }
  popup.wait().await;

  let status = popup.status.clone().context("Export finished without a status")?;
  if status.class == StatusClass::Error {
    bail!("{}", status.text);
  }
  println!("{}", status.text);
  if let Some(path) = session.downloads.last_saved() {
    println!("Saved to {}", path.display());
  }
  Ok(())
}

async fn watch_urls(session: &Session, urls: &[String]) -> Result<()> {
  let mut prefetches = Vec::new();
  for url in urls {
    prefetches.extend(session.navigate(url).await);
  }
  for handle in futures::future::join_all(prefetches).await {
    handle.context("Prefetch task failed")?;
  }

  info!(entries = session.store.keys().len(), "watch: prefetch finished");

  for url in urls {
    let id = match watch::video_id(url) {
      Ok(id) if watch::is_watch_page(url) => id,
      _ => {
        println!("{}\t(not a watch page)", url);
        continue;
      }
    };
    match session.cache.get(&id).await {
      Some(details) => println!("{}\t{}\t{}", DetailsCache::key(&id), details.title, details.author_name),
      None => println!("{}\t(not cached)", DetailsCache::key(&id)),
    }
  }
  Ok(())
}

async fn serve(session: &Session) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdout = tokio::io::stdout();

  while let Some(line) = lines.next_line().await.context("Failed to read request")? {
    if line.trim().is_empty() {
      continue;
    }
    debug!(request = %line, "serve: request received");
    let response = session.router.dispatch_json(&line).await;
    let mut out = serde_json::to_string(&response).context("Failed to serialize response")?;
    out.push('\n');
    stdout.write_all(out.as_bytes()).await.context("Failed to write response")?;
    stdout.flush().await.context("Failed to write response")?;
  }
  info!("serve: input closed");
  Ok(())
}

fn prefs(mut config: Config, args: &Args, output_dir: Option<PathBuf>, save_as: Option<bool>) -> Result<()> {
  let changed = args.endpoint.is_some() || args.log_level.is_some() || output_dir.is_some() || save_as.is_some();
  if changed {
    config.oembed_endpoint = args.endpoint.clone().or(config.oembed_endpoint);
    config.log_level = args.log_level.clone().or(config.log_level);
    config.output_dir = output_dir.or(config.output_dir);
    config.save_as = save_as.or(config.save_as);
    let path = config.save()?;
    println!("Saved {}", path.display());
  }
  print!("{}", toml::to_string(&config).context("Failed to serialize preferences")?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let config = Config::load();

  let level = args.log_level.clone().unwrap_or_else(|| config.log_level().to_string());
  let _log_guard = logging::init(&level)?;

  let endpoint = args.endpoint.clone().unwrap_or_else(|| config.endpoint());
  let options = |transcript: Option<PathBuf>, out_dir: Option<PathBuf>, save_as: bool| SessionOptions {
    endpoint: endpoint.clone(),
    out_dir: out_dir.unwrap_or_else(|| config.output_dir()),
    save_as,
    title_timeout: config.title_timeout(),
    transcripts: transcripts(transcript),
  };

  match &args.command {
    Command::Preview { url } => {
      let session = Session::start(options(None, None, false))?;
      session.boot().await;
      preview(&session, url).await
    }
    Command::Export { url, transcript, out_dir, no_prompt } => {
      let session = Session::start(options(transcript.clone(), out_dir.clone(), config.save_as() && !no_prompt))?;
      session.boot().await;
      export(&session, url).await
    }
    Command::Watch { urls } => {
      let session = Session::start(options(None, None, false))?;
      session.boot().await;
      watch_urls(&session, urls).await
    }
    Command::Serve { tab, transcript, out_dir } => {
      // Requests arrive on stdin, so never prompt there.
      let session = Session::start(options(transcript.clone(), out_dir.clone(), false))?;
      session.boot_with_tab(tab.as_deref()).await;
      serve(&session).await
    }
    Command::Prefs { output_dir, save_as } => prefs(config.clone(), &args, output_dir.clone(), *save_as),
  }
}
