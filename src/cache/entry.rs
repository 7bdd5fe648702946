//! Core types for stored responses.

use chrono::{DateTime, TimeZone, Utc};

use crate::http::{Headers, Response};

/// Header recording when an API response was written (ms since the epoch).
pub const CACHE_TIMESTAMP_HEADER: &str = "cache-timestamp";

/// A response stored under a (partition, request key) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Absolute request URL (or synthetic key) the entry was stored under
  pub request_key: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// When the row was written, by the store's clock
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Rebuild the response that was stored.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// Time recorded in the `cache-timestamp` header, if present and valid.
  pub fn cache_timestamp(&self) -> Option<DateTime<Utc>> {
    self
      .headers
      .get(CACHE_TIMESTAMP_HEADER)
      .and_then(|v| v.parse::<i64>().ok())
      .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
  }
}

/// Copy of `response` carrying a `cache-timestamp` of `now`.
pub fn stamp(response: &Response, now: DateTime<Utc>) -> Response {
  response
    .clone()
    .with_header(CACHE_TIMESTAMP_HEADER, now.timestamp_millis().to_string())
}

/// Where a response handed back to the application came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live response from the origin
  Network,
  /// Stored response, fresh enough to serve
  Cache,
  /// Synthesized stand-in (empty list, placeholder, offline page)
  Fallback,
  /// Offline error contract (202 queued / 503 unavailable)
  Offline,
}
