use tracing::debug;

use super::{Served, Strategies};
use crate::cache::CacheSource;
use crate::http::{Request, Response};
use crate::lifecycle::offline_document;

impl Strategies {
  /// Network first; then the exact document, the app shell, the offline page.
  pub async fn navigation(&self, request: &Request) -> Served {
    let error = match self
      .transport
      .send(request, self.timeouts.resource())
      .await
    {
      Ok(response) => {
        if response.is_success() {
          self.cache_put(&self.partitions.dynamic, request.cache_key(), &response);
        }
        return Served::new(response, CacheSource::Network);
      }
      Err(e) => e,
    };
    debug!(url = %request.url, error = %error, "navigation failed, using cached document");

    if let Some(entry) = self.cache_find(request.cache_key()) {
      return Served::new(entry.to_response(), CacheSource::Cache);
    }
    if let Some(entry) = self.cache_find(self.app_shell.as_str()) {
      return Served::new(entry.to_response(), CacheSource::Fallback);
    }
    if let Some(entry) = self.cache_find(self.offline_page.as_str()) {
      return Served::new(entry.to_response(), CacheSource::Fallback);
    }

    Served::new(
      Response::html(503, offline_document(&self.app_name)),
      CacheSource::Offline,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::PartitionStore;
  use crate::http::RequestMode;
  use crate::strategy::testing::Harness;

  fn navigate(h: &Harness, path: &str) -> Request {
    Request::get(h.url(path)).with_mode(RequestMode::Navigate)
  }

  #[tokio::test]
  async fn test_online_navigation_is_cached() {
    let h = Harness::new();
    let url = h.url("/sales");
    h.network.respond(url.as_str(), Response::html(200, "<h1>Sales</h1>"));

    let served = h.strategies.navigation(&navigate(&h, "/sales")).await;
    assert_eq!(served.source, CacheSource::Network);
    assert!(h
      .store
      .get(&h.config.partitions().dynamic, url.as_str())
      .unwrap()
      .is_some());

    h.network.set_online(false);
    let served = h.strategies.navigation(&navigate(&h, "/sales")).await;
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.response.body, b"<h1>Sales</h1>");
  }

  #[tokio::test]
  async fn test_falls_back_to_app_shell() {
    let h = Harness::new();
    h.store
      .put(
        &h.config.partitions().static_assets,
        h.url("/index.html").as_str(),
        &Response::html(200, "<div id=root></div>"),
      )
      .unwrap();
    h.network.set_online(false);

    let served = h.strategies.navigation(&navigate(&h, "/customers/4")).await;
    assert_eq!(served.source, CacheSource::Fallback);
    assert_eq!(served.response.body, b"<div id=root></div>");
  }

  #[tokio::test]
  async fn test_falls_back_to_offline_page() {
    let h = Harness::new();
    h.store
      .put(
        &h.config.partitions().static_assets,
        h.url("/offline.html").as_str(),
        &Response::html(200, "offline"),
      )
      .unwrap();
    h.network.set_online(false);

    let served = h.strategies.navigation(&navigate(&h, "/reports")).await;
    assert_eq!(served.response.body, b"offline");
  }

  #[tokio::test]
  async fn test_last_resort_is_synthesized() {
    let h = Harness::new();
    h.network.set_online(false);

    let served = h.strategies.navigation(&navigate(&h, "/reports")).await;
    assert_eq!(served.source, CacheSource::Offline);
    assert_eq!(served.response.status, 503);
    assert!(served.response.body_text().contains("<html"));
  }
}
