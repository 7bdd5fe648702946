//! Persistent response cache for offline support.
//!
//! This module provides:
//! - Named, durable partitions of stored responses (`PartitionStore`)
//! - The current generation's partition names (`Partitions`)
//! - The freshness windows applied to cached API reads (`FreshnessPolicy`)

mod entry;
mod freshness;
mod storage;

pub use entry::{stamp, CacheEntry, CacheSource};
pub use freshness::FreshnessPolicy;
pub use storage::{PartitionStore, SqliteStore};

/// Partition names of one cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
  pub static_assets: String,
  pub dynamic: String,
  pub images: String,
  /// Not version-bound: queued writes outlive upgrades
  pub mutations: String,
}

impl Partitions {
  pub fn new(app_name: &str, version: &str) -> Self {
    Self {
      static_assets: format!("{}-{}-static", app_name, version),
      dynamic: format!("{}-{}-dynamic", app_name, version),
      images: format!("{}-{}-images", app_name, version),
      mutations: format!("{}-failed-mutations", app_name),
    }
  }

  /// Allow-list kept on activation.
  pub fn current(&self) -> [&str; 4] {
    [
      self.static_assets.as_str(),
      self.dynamic.as_str(),
      self.images.as_str(),
      self.mutations.as_str(),
    ]
  }

  pub fn contains(&self, name: &str) -> bool {
    self.current().contains(&name)
  }
}
