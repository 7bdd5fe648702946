mod cache;
mod clock;
mod commands;
mod config;
mod error;
mod event;
mod http;
mod lifecycle;
mod logging;
mod net;
mod push;
mod queue;
mod router;
mod service;
mod strategy;
mod sync;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::SqliteStore;
use crate::clock::SystemClock;
use crate::net::HttpTransport;
use crate::service::Service;

#[derive(Parser, Debug)]
#[command(name = "kiduka-offline")]
#[command(about = "Offline resilience layer for the Kiduka point-of-sale client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kiduka-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin to serve, overriding the config file
  #[arg(short, long, global = true)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let log_dir = match config::Config::data_dir() {
    Ok(dir) => Some(dir.join("logs")),
    Err(e) => {
      eprintln!("file logging disabled: {}", e);
      None
    }
  };
  let _log_guard = logging::init(log_dir.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let db_path = config.database_path()?;
  debug!(path = %db_path.display(), origin = %config.origin, "opening cache store");
  let store = Arc::new(SqliteStore::open(&db_path)?);
  let transport = Arc::new(HttpTransport::new()?);
  let service = Service::new(
    config.clone(),
    store,
    transport.clone(),
    Arc::new(SystemClock),
  )?;

  if let Err(e) = commands::execute(args.command, &config, service, transport).await {
    warn!(error = %e, "command failed");
    return Err(e);
  }
  Ok(())
}
