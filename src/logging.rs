use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Build the filter. `RUST_LOG`, when set, wins over the requested level,
/// which only applies to this crate; dependencies stay at `warn`.
fn filter_for(level: &str, env: Option<&str>) -> Result<EnvFilter> {
  match env {
    Some(directives) if !directives.trim().is_empty() => {
      EnvFilter::try_new(directives).with_context(|| format!("Invalid RUST_LOG directives '{}'", directives))
    }
    _ => EnvFilter::try_new(format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level))
      .with_context(|| format!("Invalid log level '{}'", level)),
  }
}

/// Install the global subscriber writing to stderr. Keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init(level: &str) -> Result<WorkerGuard> {
  let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
  let filter = filter_for(level, env.as_deref())?;
  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_target(false)
    .try_init()
    .map_err(|e| anyhow!(e))
    .context("Setting default subscriber failed")?;
  Ok(guard)
}
