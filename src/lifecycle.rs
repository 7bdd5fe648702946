//! Install and activation of a cache generation.

use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::cache::{PartitionStore, Partitions};
use crate::config::Config;
use crate::error::StoreResult;
use crate::event::{ClientEvent, EventBus};
use crate::http::{Request, Response};
use crate::net::Transport;

/// Lifecycle state of this generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  /// Installed and waiting to take control
  Installed,
  Activating,
  Activated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  /// Precache URLs that could not be stored
  pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Partitions of other generations that were deleted
  pub deleted: Vec<String>,
}

/// Self-contained page shown when a navigation cannot be served.
pub fn offline_document(app_name: &str) -> String {
  format!(
    r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{app_name} - Offline</title>
<style>
  body {{ font-family: system-ui, sans-serif; background: #f5f5f5; color: #333;
         display: flex; align-items: center; justify-content: center;
         min-height: 100vh; margin: 0; }}
  main {{ background: #fff; padding: 2rem; border-radius: 8px; max-width: 24rem;
         text-align: center; box-shadow: 0 2px 8px rgba(0, 0, 0, 0.1); }}
  button {{ background: #2563eb; color: #fff; border: 0; border-radius: 4px;
           padding: 0.6rem 1.2rem; font-size: 1rem; cursor: pointer; }}
</style>
</head>
<body>
<main>
<h1>You are offline</h1>
<p>{app_name} cannot reach the server. Sales recorded now are saved on this device and sent once the connection returns.</p>
<button onclick="location.reload()">Try again</button>
</main>
</body>
</html>
"#
  )
}

pub struct Lifecycle {
  store: Arc<dyn PartitionStore>,
  transport: Arc<dyn Transport>,
  bus: EventBus,
  partitions: Partitions,
  version: String,
  app_name: String,
  precache: Vec<Url>,
  offline_page: Url,
  timeout: Duration,
  state: Mutex<LifecycleState>,
}

impl Lifecycle {
  pub fn new(
    config: &Config,
    store: Arc<dyn PartitionStore>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
  ) -> color_eyre::Result<Self> {
    let precache = config
      .cache
      .precache
      .iter()
      .map(|path| config.resolve(path))
      .collect::<color_eyre::Result<Vec<_>>>()?;

    Ok(Self {
      store,
      transport,
      bus,
      partitions: config.partitions(),
      version: config.cache.version.clone(),
      app_name: config.cache.app_name.clone(),
      precache,
      offline_page: config.resolve(&config.cache.offline_path)?,
      timeout: config.timeouts.resource(),
      state: Mutex::new(LifecycleState::Parsed),
    })
  }

  pub fn state(&self) -> LifecycleState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: LifecycleState) {
    match self.state.lock() {
      Ok(mut state) => *state = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
  }

  /// Create the current partitions, precache static assets and store the
  /// offline document. A failing asset is reported, not fatal.
  pub async fn install(&self) -> StoreResult<InstallReport> {
    self.set_state(LifecycleState::Installing);

    for partition in self.partitions.current() {
      self.store.open_partition(partition)?;
    }

    let fetches = self.precache.iter().map(|url| async move {
      let request = Request::get(url.clone());
      (url, self.transport.send(&request, self.timeout).await)
    });

    let mut report = InstallReport::default();
    for (url, result) in join_all(fetches).await {
      match result {
        Ok(response) if response.is_success() => {
          self
            .store
            .put(&self.partitions.static_assets, url.as_str(), &response)?;
          report.cached += 1;
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "precache asset rejected");
          report.failed.push(url.to_string());
        }
        Err(e) => {
          warn!(url = %url, error = %e, "precache asset unavailable");
          report.failed.push(url.to_string());
        }
      }
    }

    self.store.put(
      &self.partitions.static_assets,
      self.offline_page.as_str(),
      &Response::html(200, offline_document(&self.app_name)),
    )?;

    self.set_state(LifecycleState::Installed);
    info!(
      version = %self.version,
      cached = report.cached,
      failed = report.failed.len(),
      "install complete"
    );
    Ok(report)
  }

  /// Delete partitions outside the current generation and claim every open
  /// instance.
  pub fn activate(&self) -> StoreResult<ActivationReport> {
    self.set_state(LifecycleState::Activating);

    let mut report = ActivationReport::default();
    for name in self.store.partitions()? {
      if !self.partitions.contains(&name) {
        self.store.delete_partition(&name)?;
        info!(partition = %name, "deleted stale partition");
        report.deleted.push(name);
      }
    }

    self.set_state(LifecycleState::Activated);
    self.bus.publish(ClientEvent::ControlClaimed {
      version: self.version.clone(),
    });
    info!(version = %self.version, "activated");
    Ok(report)
  }

  /// Activate now if installed and waiting.
  pub fn skip_waiting(&self) -> StoreResult<Option<ActivationReport>> {
    if self.state() == LifecycleState::Installed {
      self.activate().map(Some)
    } else {
      Ok(None)
    }
  }
}
