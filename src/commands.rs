//! Command-line subcommands, each a thin driver over `Service`.

use clap::{Args, Subcommand};
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::event::{ClientMessage, MessageReply, SyncTrigger};
use crate::http::{Destination, Method, Request, RequestMode, Response};
use crate::net::Transport;
use crate::service::{Dispatch, Service};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Precache this version's assets and activate it
  Install,
  /// Route one request through the offline layer
  Fetch(FetchArgs),
  /// Show entry counts per cache partition
  Status,
  /// Delete every cache partition, queued writes included
  Clear,
  /// List writes waiting to be replayed
  Queue,
  /// Replay queued writes now
  Sync,
  /// Run the service until Ctrl-C
  Run,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
  /// Absolute URL, or a path resolved against the origin
  pub url: String,

  #[arg(short = 'X', long, default_value = "GET")]
  pub method: Method,

  /// Request body
  #[arg(short, long)]
  pub data: Option<String>,

  /// Extra header as `Name: value`; repeatable
  #[arg(short = 'H', long = "header")]
  pub headers: Vec<String>,

  /// Request destination (document, image, script, style, font, manifest)
  #[arg(long)]
  pub dest: Option<Destination>,

  /// Treat as a page navigation
  #[arg(long)]
  pub navigate: bool,
}

impl FetchArgs {
  fn to_request(&self, config: &Config) -> Result<Request> {
    let url = match url::Url::parse(&self.url) {
      Ok(url) => url,
      Err(url::ParseError::RelativeUrlWithoutBase) => config.resolve(&self.url)?,
      Err(e) => bail!("Invalid URL '{}': {}", self.url, e),
    };

    let mut request = Request::new(self.method, url);
    for header in &self.headers {
      let (name, value) = header
        .split_once(':')
        .ok_or_else(|| eyre!("Header '{}' is not in 'Name: value' form", header))?;
      request = request.with_header(name.trim(), value.trim());
    }
    if let Some(data) = &self.data {
      request = request.with_body(data.as_str());
    }
    if let Some(dest) = self.dest {
      request = request.with_destination(dest);
    }
    if self.navigate {
      request = request
        .with_mode(RequestMode::Navigate)
        .with_destination(Destination::Document);
    }
    Ok(request)
  }
}

pub async fn execute(
  command: Command,
  config: &Config,
  service: Service,
  transport: Arc<dyn Transport>,
) -> Result<()> {
  match command {
    Command::Install => install(&service).await,
    Command::Fetch(args) => fetch(&args, config, &service, transport.as_ref()).await,
    Command::Status => status(&service).await,
    Command::Clear => clear(&service).await,
    Command::Queue => queue(&service),
    Command::Sync => sync(&service).await,
    Command::Run => run(service).await,
  }
}

async fn install(service: &Service) -> Result<()> {
  let report = service.start().await?;
  println!("cached {} assets", report.cached);
  for url in &report.failed {
    println!("  failed: {}", url);
  }
  println!("state: {:?}", service.lifecycle_state());
  Ok(())
}

async fn fetch(
  args: &FetchArgs,
  config: &Config,
  service: &Service,
  transport: &dyn Transport,
) -> Result<()> {
  let request = args.to_request(config)?;
  let (response, source) = match service.fetch(&request).await? {
    Dispatch::Respond(served) => (served.response, format!("{:?}", served.source)),
    Dispatch::Bypass => {
      let response = transport.send(&request, config.timeouts.api()).await?;
      (response, "Bypass".to_string())
    }
  };
  print_response(&response, &source);
  Ok(())
}

fn print_response(response: &Response, source: &str) {
  println!("{} ({})", response.status, source);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.body_text());
}

async fn status(service: &Service) -> Result<()> {
  let MessageReply::CacheStatus(counts) = service.handle_message(ClientMessage::GetCacheStatus).await
  else {
    bail!("unexpected reply to cache status request");
  };
  if counts.is_empty() {
    println!("no cache partitions");
  }
  for (name, count) in counts {
    println!("{:<40} {}", name, count);
  }
  Ok(())
}

async fn clear(service: &Service) -> Result<()> {
  match service.handle_message(ClientMessage::ClearCache).await {
    MessageReply::Cleared { success: true } => {
      println!("cleared");
      Ok(())
    }
    _ => bail!("clearing caches failed, see log"),
  }
}

fn queue(service: &Service) -> Result<()> {
  let pending = service.queue().list_all()?;
  if pending.is_empty() {
    println!("queue is empty");
  }
  for mutation in pending {
    println!(
      "{}  {:<6} {}  retries={}  {}",
      mutation.id,
      mutation.method,
      mutation.url,
      mutation.retry_count,
      mutation.created_at.to_rfc3339()
    );
  }
  Ok(())
}

async fn sync(service: &Service) -> Result<()> {
  let report = service.sync(SyncTrigger::Explicit).await?;
  println!(
    "synced {}, failed {}, dropped {}",
    report.synced, report.failed, report.dropped
  );
  Ok(())
}

async fn run(service: Service) -> Result<()> {
  service.start().await?;
  let (handle, task) = service.spawn();
  let mut events = handle.subscribe();

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.next() => match event {
        Some(event) => {
          let json = serde_json::to_string(&event)?;
          info!(event = %json, "broadcast");
          println!("{}", json);
        }
        None => break,
      },
    }
  }

  info!("shutting down");
  drop(events);
  drop(handle);
  task.await?;
  Ok(())
}
