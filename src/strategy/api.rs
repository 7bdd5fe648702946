use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::{debug, error, info};

use super::{Served, Strategies};
use crate::cache::{stamp, CacheSource};
use crate::http::{Method, Request, Response};

pub const QUEUED_MESSAGE: &str = "Request queued for sync when online";
pub const UNAVAILABLE_MESSAGE: &str = "Service unavailable - please check your connection";

/// 202 acknowledgement for a write held in the offline queue.
fn queued_response() -> Response {
  Response::json(
    202,
    &json!({ "error": QUEUED_MESSAGE, "offline": true, "queued": true }),
  )
}

/// 503 returned when nothing better is available.
fn unavailable_response(now: DateTime<Utc>) -> Response {
  Response::json(
    503,
    &json!({
      "error": UNAVAILABLE_MESSAGE,
      "offline": true,
      "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }),
  )
}

/// Empty list stand-in so list views render instead of erroring.
fn empty_list_response() -> Response {
  Response::new(200, "[]")
    .with_header("content-type", "application/json")
    .with_header("served-by", "sw-fallback")
}

impl Strategies {
  /// Network first; on failure serve a fresh cached read, an empty list,
  /// queue the write, or answer 503.
  pub async fn api(&self, request: &Request) -> Served {
    match self.transport.send(request, self.timeouts.api()).await {
      Ok(response) => {
        if request.method == Method::Get && response.is_success() {
          let stamped = stamp(&response, self.clock.now());
          self.cache_put(&self.partitions.dynamic, request.cache_key(), &stamped);
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(method = %request.method, url = %request.url, error = %e, "api request failed");
        self.api_offline(request)
      }
    }
  }

  fn api_offline(&self, request: &Request) -> Served {
    let now = self.clock.now();

    if request.method == Method::Get {
      let path = request.url.path();
      if let Some(entry) = self.cache_get(&self.partitions.dynamic, request.cache_key()) {
        if let Some(age) = self.freshness.fresh_age(path, &entry, now) {
          let response = entry
            .to_response()
            .with_header("served-by", "sw-cache")
            .with_header("cache-age", format!("{} minutes", age.num_minutes()));
          return Served::new(response, CacheSource::Cache);
        }
        debug!(url = %request.url, "cached api response is stale");
      }

      if self.freshness.is_list(path) {
        return Served::new(empty_list_response(), CacheSource::Fallback);
      }
    } else if request.method.is_queueable() {
      match self.queue.enqueue(request) {
        Ok(mutation) => {
          info!(id = %mutation.id, method = %mutation.method, url = %mutation.url, "queued offline write");
          return Served::new(queued_response(), CacheSource::Offline);
        }
        Err(e) => {
          error!(url = %request.url, error = %e, "failed to queue offline write");
        }
      }
    }

    Served::new(unavailable_response(now), CacheSource::Offline)
  }
}
