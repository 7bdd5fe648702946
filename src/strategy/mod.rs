//! Read-path strategies applied to classified requests.
//!
//! Each strategy always produces a response; cache-store faults are logged
//! and treated as misses so a broken store degrades to plain network access.

mod api;
mod assets;
mod navigation;

use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::cache::{CacheEntry, CacheSource, FreshnessPolicy, PartitionStore, Partitions};
use crate::clock::Clock;
use crate::config::{Config, TimeoutConfig};
use crate::http::Response;
use crate::net::Transport;
use crate::queue::MutationQueue;

/// A response together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: Response,
  pub source: CacheSource,
}

impl Served {
  fn new(response: Response, source: CacheSource) -> Self {
    Self { response, source }
  }
}

/// Shared state of all strategies.
#[derive(Clone)]
pub struct Strategies {
  store: Arc<dyn PartitionStore>,
  transport: Arc<dyn Transport>,
  clock: Arc<dyn Clock>,
  queue: MutationQueue,
  partitions: Partitions,
  freshness: FreshnessPolicy,
  timeouts: TimeoutConfig,
  app_name: String,
  app_shell: Url,
  offline_page: Url,
  placeholder_image: Url,
}

impl Strategies {
  pub fn new(
    config: &Config,
    store: Arc<dyn PartitionStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    queue: MutationQueue,
  ) -> color_eyre::Result<Self> {
    Ok(Self {
      store,
      transport,
      clock,
      queue,
      partitions: config.partitions(),
      freshness: FreshnessPolicy::new(&config.cache, &config.policy),
      timeouts: config.timeouts.clone(),
      app_name: config.cache.app_name.clone(),
      app_shell: config.resolve(&config.cache.app_shell)?,
      offline_page: config.resolve(&config.cache.offline_path)?,
      placeholder_image: config.resolve(&config.cache.placeholder_image)?,
    })
  }

  fn cache_get(&self, partition: &str, key: &str) -> Option<CacheEntry> {
    match self.store.get(partition, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(partition, key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Match across all partitions.
  fn cache_find(&self, key: &str) -> Option<CacheEntry> {
    match self.store.find(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn cache_put(&self, partition: &str, key: &str, response: &Response) {
    if let Err(e) = self.store.put(partition, key, response) {
      warn!(partition, key, error = %e, "cache write failed");
    }
  }
}
