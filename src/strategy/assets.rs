use tracing::debug;

use super::{Served, Strategies};
use crate::cache::CacheSource;
use crate::error::NetworkError;
use crate::http::{Request, Response};

impl Strategies {
  /// Cache first against `partition`, write-through on a 2xx network answer.
  async fn cache_first(&self, partition: &str, request: &Request) -> Result<Served, NetworkError> {
    if let Some(entry) = self.cache_get(partition, request.cache_key()) {
      return Ok(Served::new(entry.to_response(), CacheSource::Cache));
    }

    let response = self
      .transport
      .send(request, self.timeouts.resource())
      .await?;
    if response.is_success() {
      self.cache_put(partition, request.cache_key(), &response);
    }
    Ok(Served::new(response, CacheSource::Network))
  }

  /// Images: cache first, placeholder (or 404) when both cache and network fail.
  pub async fn image(&self, request: &Request) -> Served {
    match self.cache_first(&self.partitions.images, request).await {
      Ok(served) => served,
      Err(e) => {
        debug!(url = %request.url, error = %e, "image unavailable, serving placeholder");
        match self.cache_find(self.placeholder_image.as_str()) {
          Some(entry) => Served::new(entry.to_response(), CacheSource::Fallback),
          None => Served::new(Response::not_found(), CacheSource::Fallback),
        }
      }
    }
  }

  /// Scripts, styles, fonts: cache first, network failure is the caller's.
  pub async fn static_asset(&self, request: &Request) -> Result<Served, NetworkError> {
    self
      .cache_first(&self.partitions.static_assets, request)
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::PartitionStore;
  use crate::http::{Destination, Method};
  use crate::strategy::testing::Harness;

  fn image_request(h: &Harness, path: &str) -> Request {
    Request::get(h.url(path)).with_destination(Destination::Image)
  }

  #[tokio::test]
  async fn test_image_miss_fetches_and_caches() {
    let h = Harness::new();
    let url = h.url("/img/soap.png");
    h.network.respond(url.as_str(), Response::new(200, "PNG"));

    let served = h.strategies.image(&image_request(&h, "/img/soap.png")).await;
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(served.response.body, b"PNG");
    assert!(h
      .store
      .get(&h.config.partitions().images, url.as_str())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_image_hit_skips_network() {
    let h = Harness::new();
    let url = h.url("/img/soap.png");
    h.store
      .put(&h.config.partitions().images, url.as_str(), &Response::new(200, "cached"))
      .unwrap();

    let served = h.strategies.image(&image_request(&h, "/img/soap.png")).await;
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.response.body, b"cached");
    assert!(h.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_image_failure_serves_placeholder() {
    let h = Harness::new();
    let placeholder = h.url("/placeholder.svg");
    h.store
      .put(
        &h.config.partitions().static_assets,
        placeholder.as_str(),
        &Response::new(200, "<svg/>"),
      )
      .unwrap();
    h.network.set_online(false);

    let served = h.strategies.image(&image_request(&h, "/img/missing.png")).await;
    assert_eq!(served.source, CacheSource::Fallback);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.body, b"<svg/>");
  }

  #[tokio::test]
  async fn test_image_failure_without_placeholder_is_404() {
    let h = Harness::new();
    h.network.set_online(false);

    let served = h.strategies.image(&image_request(&h, "/img/missing.png")).await;
    assert_eq!(served.response.status, 404);
  }

  #[tokio::test]
  async fn test_image_error_status_returned_uncached() {
    let h = Harness::new();
    let served = h.strategies.image(&image_request(&h, "/img/nope.png")).await;
    assert_eq!(served.response.status, 404);
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(h.store.count(&h.config.partitions().images).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_static_miss_caches() {
    let h = Harness::new();
    let url = h.url("/assets/app.js");
    h.network.respond(url.as_str(), Response::new(200, "js"));

    let request = Request::get(url.clone()).with_destination(Destination::Script);
    let served = h.strategies.static_asset(&request).await.unwrap();
    assert_eq!(served.response.body, b"js");

    h.network.set_online(false);
    let served = h.strategies.static_asset(&request).await.unwrap();
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(h.network.calls_to(url.as_str()), 1);
  }

  #[tokio::test]
  async fn test_resources_use_resource_timeout() {
    let h = Harness::new();
    h.strategies.image(&image_request(&h, "/img/soap.png")).await;
    let script = Request::get(h.url("/assets/app.js")).with_destination(Destination::Script);
    h.strategies.static_asset(&script).await.unwrap();

    let resource = h.config.timeouts.resource();
    assert_eq!(resource, std::time::Duration::from_secs(3));
    assert_eq!(h.network.timeouts(), vec![resource, resource]);
  }

  #[tokio::test]
  async fn test_static_failure_propagates() {
    let h = Harness::new();
    h.network.set_online(false);

    let request = Request::new(Method::Get, h.url("/assets/app.css"));
    let result = h.strategies.static_asset(&request).await;
    assert!(matches!(result, Err(NetworkError::Unreachable(_))));
  }
}
