//! Error types for the storage and network seams.
//!
//! The request path never lets these escape to the application: strategies
//! match on them and pick a fallback. They exist so that choice is explicit.

use std::time::Duration;
use thiserror::Error;

/// Failures of the persistent partition store.
#[derive(Error, Debug)]
pub enum StoreError {
  /// SQLite rejected the statement or the database is unavailable.
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// A stored record could not be encoded or decoded.
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  /// I/O error while preparing the database location.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Another thread panicked while holding the connection.
  #[error("Store lock poisoned")]
  LockPoisoned,

  /// A timestamp column held something we did not write.
  #[error("Invalid timestamp '{0}'")]
  Timestamp(String),
}

/// Failures to get any response from the origin.
///
/// An HTTP error status is not a `NetworkError`: the origin answered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  /// No response within the allotted time.
  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  /// Connection refused, DNS failure, reset, or any other transport fault.
  #[error("Network unreachable: {0}")]
  Unreachable(String),

  /// The request could not be built (bad URL, bad header).
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_builder() {
      NetworkError::InvalidRequest(err.to_string())
    } else {
      NetworkError::Unreachable(err.to_string())
    }
  }
}

/// Failures talking to a running service through its handle.
#[derive(Error, Debug)]
pub enum ServiceError {
  /// The service task has shut down.
  #[error("Service stopped")]
  Stopped,

  /// A static asset could not be fetched and is not cached.
  #[error(transparent)]
  Network(#[from] NetworkError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
