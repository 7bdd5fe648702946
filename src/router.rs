//! Request classification.

use crate::http::{Destination, Method, Request, RequestMode};

/// Handling strategy selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the caller talks to the network itself
  Bypass,
  /// Network first, cached reads and queued writes as fallback
  Api,
  /// Cache first, placeholder on failure
  Image,
  /// Network first, document fallback chain
  Navigation,
  /// Cache first, failure propagates
  Static,
}

/// Pick the strategy for `request`. Pure and total.
pub fn classify(request: &Request, api_prefix: &str) -> Route {
  if !matches!(request.url.scheme(), "http" | "https") {
    return Route::Bypass;
  }

  if is_api_path(request.url.path(), api_prefix) {
    return Route::Api;
  }

  // Only reads can be served from or written to the cache
  if request.method != Method::Get {
    return Route::Bypass;
  }

  match (request.destination, request.mode) {
    (Destination::Image, _) => Route::Image,
    (Destination::Document, _) | (_, RequestMode::Navigate) => Route::Navigation,
    _ => Route::Static,
  }
}

fn is_api_path(path: &str, api_prefix: &str) -> bool {
  let prefix = api_prefix.trim_end_matches('/');
  match path.strip_prefix(prefix) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_api_prefix() {
    assert_eq!(classify(&request("https://pos.test/api/products"), "/api"), Route::Api);
    assert_eq!(classify(&request("https://pos.test/api"), "/api"), Route::Api);
    assert_eq!(
      classify(&request("https://pos.test/apiary.png"), "/api"),
      Route::Static
    );
  }

  #[test]
  fn test_api_wins_over_destination() {
    let req = request("https://pos.test/api/products/1/photo").with_destination(Destination::Image);
    assert_eq!(classify(&req, "/api"), Route::Api);
  }

  #[test]
  fn test_api_writes_are_routed() {
    let req = Request::new(Method::Post, Url::parse("https://pos.test/api/sales").unwrap());
    assert_eq!(classify(&req, "/api"), Route::Api);
  }

  #[test]
  fn test_non_http_scheme_bypasses() {
    assert_eq!(classify(&request("chrome-extension://abc/app.js"), "/api"), Route::Bypass);
    assert_eq!(classify(&request("data:text/plain,hi"), "/api"), Route::Bypass);
  }

  #[test]
  fn test_non_api_writes_bypass() {
    let req = Request::new(Method::Post, Url::parse("https://pos.test/upload").unwrap());
    assert_eq!(classify(&req, "/api"), Route::Bypass);
  }

  #[test]
  fn test_destinations() {
    let image = request("https://pos.test/logo.png").with_destination(Destination::Image);
    assert_eq!(classify(&image, "/api"), Route::Image);

    let document = request("https://pos.test/sales").with_destination(Destination::Document);
    assert_eq!(classify(&document, "/api"), Route::Navigation);

    let navigate = request("https://pos.test/sales").with_mode(RequestMode::Navigate);
    assert_eq!(classify(&navigate, "/api"), Route::Navigation);

    for dest in [Destination::Script, Destination::Style, Destination::Font, Destination::Empty] {
      let req = request("https://pos.test/assets/x").with_destination(dest);
      assert_eq!(classify(&req, "/api"), Route::Static);
    }
  }

  #[test]
  fn test_classification_is_total_and_deterministic() {
    let urls = [
      "https://pos.test/",
      "https://pos.test/api/x",
      "http://pos.test/img.png",
      "ftp://pos.test/file",
    ];
    let methods = [Method::Get, Method::Post, Method::Put, Method::Delete, Method::Head];
    let destinations = [
      Destination::Empty,
      Destination::Document,
      Destination::Image,
      Destination::Script,
      Destination::Style,
      Destination::Font,
      Destination::Manifest,
    ];
    let modes = [
      RequestMode::Cors,
      RequestMode::SameOrigin,
      RequestMode::NoCors,
      RequestMode::Navigate,
    ];

    for url in urls {
      for method in methods {
        for dest in destinations {
          for mode in modes {
            let req = Request::new(method, Url::parse(url).unwrap())
              .with_destination(dest)
              .with_mode(mode);
            assert_eq!(classify(&req, "/api"), classify(&req, "/api"));
          }
        }
      }
    }
  }
}
