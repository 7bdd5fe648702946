//! Network transport used by the strategies, the synchronizer and the
//! lifecycle installer.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;

use crate::error::NetworkError;
use crate::http::{Headers, Request, Response};

/// Sends a request to the origin.
///
/// Implementations must report a missing response (timeout, refused
/// connection) as `NetworkError`, and any HTTP status as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request, timeout: Duration) -> Result<Response, NetworkError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self, NetworkError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("kiduka-offline/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }

  fn header_map(headers: &Headers) -> Result<HeaderMap, NetworkError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| NetworkError::InvalidRequest(format!("header {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| NetworkError::InvalidRequest(format!("header value: {}", e)))?;
      map.insert(name, value);
    }
    Ok(map)
  }

  async fn execute(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.into(), request.url.clone())
      .headers(Self::header_map(&request.headers)?);
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request, timeout: Duration) -> Result<Response, NetworkError> {
    debug!(method = %request.method, url = %request.url, "network request");
    match tokio::time::timeout(timeout, self.execute(request)).await {
      Ok(result) => result,
      Err(_) => Err(NetworkError::Timeout(timeout)),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;
  use url::Url;

  #[tokio::test]
  async fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept and hold the connection without ever answering
    let server = tokio::spawn(async move {
      let (socket, _) = listener.accept().await.unwrap();
      tokio::time::sleep(Duration::from_secs(30)).await;
      drop(socket);
    });

    let transport = HttpTransport::new().unwrap();
    let url = Url::parse(&format!("http://{}/api/products", addr)).unwrap();
    let timeout = Duration::from_millis(200);
    let result = transport.send(&Request::get(url), timeout).await;

    assert_eq!(result, Err(NetworkError::Timeout(timeout)));
    server.abort();
  }

  #[tokio::test]
  async fn test_refused_connection_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new().unwrap();
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    let result = transport.send(&Request::get(url), Duration::from_secs(2)).await;

    assert!(matches!(result, Err(NetworkError::Unreachable(_))));
  }
}
