use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
  fmt,
  layer::{Layer, SubscriberExt},
  util::SubscriberInitExt,
  EnvFilter,
};

const DEFAULT_DIRECTIVE: &str = "kiduka_offline=info";
const LOG_FILE_PREFIX: &str = "kiduka-offline.log";

/// Install the global subscriber: stderr filtered by `RUST_LOG`, plus a
/// daily rolling file under `log_dir` when one is given.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file lines are lost on exit.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(env_filter());

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(env_filter());
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
