//! Durable queue of writes that failed while offline.
//!
//! Entries live in the mutation partition as JSON bodies under a synthetic
//! key. The API strategy is the only producer; the synchronizer is the only
//! consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::cache::PartitionStore;
use crate::clock::Clock;
use crate::error::StoreResult;
use crate::http::{Headers, Method, Request, Response};

/// One failed write awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
  pub id: String,
  pub url: String,
  pub method: Method,
  pub headers: Headers,
  pub body: String,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl QueuedMutation {
  /// Rebuild the request for replay.
  pub fn to_request(&self) -> Result<Request, url::ParseError> {
    let mut request = Request::new(self.method, Url::parse(&self.url)?);
    request.headers = self.headers.clone();
    request.body = self.body.clone().into_bytes();
    Ok(request)
  }

  fn storage_key(id: &str) -> String {
    format!("queued-mutation:{}", id)
  }
}

/// Creation time in ms plus a random suffix.
fn generate_id(now: DateTime<Utc>) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}

#[derive(Clone)]
pub struct MutationQueue {
  store: Arc<dyn PartitionStore>,
  partition: String,
  clock: Arc<dyn Clock>,
}

impl MutationQueue {
  pub fn new(store: Arc<dyn PartitionStore>, partition: String, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      partition,
      clock,
    }
  }

  /// Persist `request` with a retry count of zero.
  pub fn enqueue(&self, request: &Request) -> StoreResult<QueuedMutation> {
    let now = self.clock.now();
    let mutation = QueuedMutation {
      id: generate_id(now),
      url: request.url.to_string(),
      method: request.method,
      headers: request.headers.clone(),
      body: String::from_utf8_lossy(&request.body).into_owned(),
      created_at: now,
      retry_count: 0,
    };
    self.persist(&mutation)?;
    Ok(mutation)
  }

  fn persist(&self, mutation: &QueuedMutation) -> StoreResult<()> {
    let body = serde_json::to_vec(mutation)?;
    let response = Response::new(200, body).with_header("content-type", "application/json");
    self.store.put(
      &self.partition,
      &QueuedMutation::storage_key(&mutation.id),
      &response,
    )
  }

  /// Every queued mutation, oldest first. Undecodable entries are skipped.
  pub fn list_all(&self) -> StoreResult<Vec<QueuedMutation>> {
    let mut mutations: Vec<QueuedMutation> = self
      .store
      .entries(&self.partition)?
      .into_iter()
      .filter_map(|entry| match serde_json::from_slice(&entry.body) {
        Ok(mutation) => Some(mutation),
        Err(e) => {
          warn!(key = %entry.request_key, error = %e, "skipping unreadable queued mutation");
          None
        }
      })
      .collect();
    mutations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(mutations)
  }

  pub fn get(&self, id: &str) -> StoreResult<Option<QueuedMutation>> {
    let entry = self
      .store
      .get(&self.partition, &QueuedMutation::storage_key(id))?;
    match entry {
      Some(entry) => Ok(Some(serde_json::from_slice(&entry.body)?)),
      None => Ok(None),
    }
  }

  /// Returns whether the entry existed.
  pub fn remove(&self, id: &str) -> StoreResult<bool> {
    self
      .store
      .delete(&self.partition, &QueuedMutation::storage_key(id))
  }

  /// Increment the retry count. `None` if the entry is already gone.
  pub fn bump_retry(&self, id: &str) -> StoreResult<Option<u32>> {
    match self.get(id)? {
      Some(mut mutation) => {
        mutation.retry_count += 1;
        self.persist(&mutation)?;
        Ok(Some(mutation.retry_count))
      }
      None => Ok(None),
    }
  }

  pub fn len(&self) -> StoreResult<usize> {
    self.store.count(&self.partition)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::clock::testing::ManualClock;
  use chrono::Duration;

  const PARTITION: &str = "kiduka-pos-failed-mutations";

  fn queue() -> (MutationQueue, Arc<ManualClock>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new());
    let queue = MutationQueue::new(store.clone(), PARTITION.to_string(), clock.clone());
    (queue, clock, store)
  }

  fn sale() -> Request {
    Request::new(Method::Post, Url::parse("https://pos.test/api/sales").unwrap())
      .with_header("Content-Type", "application/json")
      .with_body(r#"{"total":1200}"#)
  }

  #[test]
  fn test_enqueue_captures_request() {
    let (queue, clock, _) = queue();
    let mutation = queue.enqueue(&sale()).unwrap();

    assert_eq!(mutation.retry_count, 0);
    assert_eq!(mutation.method, Method::Post);
    assert_eq!(mutation.url, "https://pos.test/api/sales");
    assert_eq!(mutation.body, r#"{"total":1200}"#);
    assert_eq!(
      mutation.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
    assert_eq!(mutation.created_at, clock.now());
    assert!(mutation
      .id
      .starts_with(&clock.now().timestamp_millis().to_string()));

    assert_eq!(queue.list_all().unwrap(), vec![mutation]);
  }

  #[test]
  fn test_ids_are_unique_at_same_instant() {
    let (queue, _, _) = queue();
    let a = queue.enqueue(&sale()).unwrap();
    let b = queue.enqueue(&sale()).unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_list_all_oldest_first() {
    let (queue, clock, _) = queue();
    let first = queue.enqueue(&sale()).unwrap();
    clock.advance(Duration::seconds(5));
    let second = queue.enqueue(&sale()).unwrap();

    // Re-persisting the older entry must not reorder it
    queue.bump_retry(&first.id).unwrap();

    let ids: Vec<String> = queue.list_all().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
  }

  #[test]
  fn test_bump_retry_is_monotonic() {
    let (queue, _, _) = queue();
    let mutation = queue.enqueue(&sale()).unwrap();
    for expected in 1..=4 {
      assert_eq!(queue.bump_retry(&mutation.id).unwrap(), Some(expected));
    }
    assert_eq!(queue.get(&mutation.id).unwrap().unwrap().retry_count, 4);
  }

  #[test]
  fn test_remove_and_bump_missing() {
    let (queue, _, _) = queue();
    let mutation = queue.enqueue(&sale()).unwrap();
    assert!(queue.remove(&mutation.id).unwrap());
    assert!(!queue.remove(&mutation.id).unwrap());
    assert_eq!(queue.bump_retry(&mutation.id).unwrap(), None);
    assert!(queue.list_all().unwrap().is_empty());
  }

  #[test]
  fn test_unreadable_entries_are_skipped() {
    let (queue, _, store) = queue();
    store
      .put(PARTITION, "queued-mutation:garbage", &Response::new(200, "not json"))
      .unwrap();
    let mutation = queue.enqueue(&sale()).unwrap();
    assert_eq!(queue.list_all().unwrap(), vec![mutation]);
  }

  #[test]
  fn test_to_request_rebuilds_request() {
    let (queue, _, _) = queue();
    let mutation = queue.enqueue(&sale()).unwrap();
    let request = mutation.to_request().unwrap();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.url.as_str(), "https://pos.test/api/sales");
    assert_eq!(request.body, br#"{"total":1200}"#);
  }
}
