use chrono::{DateTime, Duration, Utc};

use super::entry::CacheEntry;
use crate::config::{CacheConfig, PolicyConfig};

/// Decides whether a cached API read may still be served.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
  api_prefix: String,
  critical_endpoints: Vec<String>,
  list_endpoints: Vec<String>,
  critical_max_age: Duration,
  default_max_age: Duration,
}

impl FreshnessPolicy {
  pub fn new(cache: &CacheConfig, policy: &PolicyConfig) -> Self {
    Self {
      api_prefix: cache.api_prefix.trim_end_matches('/').to_string(),
      critical_endpoints: policy.critical_endpoints.clone(),
      list_endpoints: policy.list_endpoints.clone(),
      critical_max_age: policy.critical_max_age(),
      default_max_age: policy.default_max_age(),
    }
  }

  /// First path segment after the API prefix ("/api/products/7" -> "products").
  fn endpoint<'a>(&self, path: &'a str) -> Option<&'a str> {
    path
      .strip_prefix(&self.api_prefix)?
      .strip_prefix('/')?
      .split('/')
      .next()
      .filter(|segment| !segment.is_empty())
  }

  pub fn is_critical(&self, path: &str) -> bool {
    self
      .endpoint(path)
      .is_some_and(|e| self.critical_endpoints.iter().any(|c| c == e))
  }

  /// Endpoints the UI renders as lists; they degrade to `[]`.
  pub fn is_list(&self, path: &str) -> bool {
    self
      .endpoint(path)
      .is_some_and(|e| self.list_endpoints.iter().any(|l| l == e))
  }

  pub fn max_age(&self, path: &str) -> Duration {
    if self.is_critical(path) {
      self.critical_max_age
    } else {
      self.default_max_age
    }
  }

  /// Age of `entry` if it is young enough to serve for `path`.
  ///
  /// Entries without a readable `cache-timestamp`, or stamped in the
  /// future, are never fresh.
  pub fn fresh_age(&self, path: &str, entry: &CacheEntry, now: DateTime<Utc>) -> Option<Duration> {
    let written = entry.cache_timestamp()?;
    let age = now - written;
    (age >= Duration::zero() && age < self.max_age(path)).then_some(age)
  }
}
