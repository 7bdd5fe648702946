//! Replay of queued offline writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::event::{ClientEvent, EventBus, SyncTrigger};
use crate::net::Transport;
use crate::queue::MutationQueue;

/// Whether a drain is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Replayed successfully and removed
  pub synced: usize,
  /// Replay failed; retry count bumped
  pub failed: usize,
  /// Removed after reaching the retry ceiling
  pub dropped: usize,
  /// Another pass was already draining; nothing was done
  pub coalesced: bool,
}

/// Resets the draining flag however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct Synchronizer {
  queue: MutationQueue,
  transport: Arc<dyn Transport>,
  bus: EventBus,
  max_retries: u32,
  timeout: Duration,
  draining: AtomicBool,
}

impl Synchronizer {
  pub fn new(
    queue: MutationQueue,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    max_retries: u32,
    timeout: Duration,
  ) -> Self {
    Self {
      queue,
      transport,
      bus,
      max_retries,
      timeout,
      draining: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> SyncState {
    if self.draining.load(Ordering::Acquire) {
      SyncState::Draining
    } else {
      SyncState::Idle
    }
  }

  /// Attempt every queued mutation once.
  ///
  /// A call made while another pass is draining returns immediately with
  /// `coalesced` set. `SYNC_COMPLETE` is published only if something synced.
  pub async fn run(&self, trigger: SyncTrigger) -> StoreResult<SyncReport> {
    if self
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!(?trigger, "sync already draining, coalesced");
      return Ok(SyncReport {
        coalesced: true,
        ..SyncReport::default()
      });
    }
    let _guard = DrainGuard(&self.draining);

    let mut report = SyncReport::default();
    for pending in self.queue.list_all()? {
      // A clear-all may have removed it since the listing
      let mutation = match self.queue.get(&pending.id) {
        Ok(Some(mutation)) => mutation,
        Ok(None) => continue,
        Err(e) => {
          warn!(id = %pending.id, error = %e, "cannot re-read queued mutation, skipping");
          continue;
        }
      };

      if mutation.retry_count >= self.max_retries {
        self.discard(&mutation.id);
        warn!(
          id = %mutation.id,
          method = %mutation.method,
          url = %mutation.url,
          retries = mutation.retry_count,
          "dropping queued mutation after max retries"
        );
        report.dropped += 1;
        continue;
      }

      let request = match mutation.to_request() {
        Ok(request) => request,
        Err(e) => {
          warn!(id = %mutation.id, error = %e, "dropping queued mutation with invalid url");
          self.discard(&mutation.id);
          report.dropped += 1;
          continue;
        }
      };

      match self.transport.send(&request, self.timeout).await {
        Ok(response) if response.is_success() => {
          // A failed remove leaves it queued and it will be replayed again
          self.discard(&mutation.id);
          debug!(id = %mutation.id, status = response.status, "queued mutation synced");
          report.synced += 1;
        }
        Ok(response) => {
          self.record_failure(&mutation.id);
          debug!(id = %mutation.id, status = response.status, "queued mutation rejected");
          report.failed += 1;
        }
        Err(e) => {
          self.record_failure(&mutation.id);
          debug!(id = %mutation.id, error = %e, "queued mutation replay failed");
          report.failed += 1;
        }
      }
    }

    if report.synced > 0 {
      self.bus.publish(ClientEvent::SyncComplete {
        synced_count: report.synced,
      });
    }
    info!(
      ?trigger,
      synced = report.synced,
      failed = report.failed,
      dropped = report.dropped,
      "sync pass finished"
    );
    Ok(report)
  }

  fn discard(&self, id: &str) {
    if let Err(e) = self.queue.remove(id) {
      warn!(id, error = %e, "failed to remove queued mutation");
    }
  }

  fn record_failure(&self, id: &str) {
    if let Err(e) = self.queue.bump_retry(id) {
      warn!(id, error = %e, "failed to record replay failure");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, PartitionStore, SqliteStore};
  use crate::clock::testing::ManualClock;
  use crate::error::StoreError;
  use std::sync::atomic::AtomicUsize;
  use crate::http::{Method, Request, Response};
  use crate::net::testing::FakeNetwork;
  use url::Url;

  const SALES: &str = "https://pos.kiduka.test/api/sales";

  struct Setup {
    queue: MutationQueue,
    network: Arc<FakeNetwork>,
    bus: EventBus,
    sync: Arc<Synchronizer>,
  }

  fn setup() -> Setup {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new());
    let queue = MutationQueue::new(store, "mutations".to_string(), clock);
    let network = Arc::new(FakeNetwork::offline());
    let bus = EventBus::default();
    let sync = Arc::new(Synchronizer::new(
      queue.clone(),
      network.clone(),
      bus.clone(),
      3,
      Duration::from_secs(5),
    ));
    Setup {
      queue,
      network,
      bus,
      sync,
    }
  }

  fn sale() -> Request {
    Request::new(Method::Post, Url::parse(SALES).unwrap()).with_body(r#"{"total":10}"#)
  }

  #[tokio::test]
  async fn test_success_removes_and_broadcasts_once() {
    let s = setup();
    let mut sub = s.bus.subscribe();
    s.queue.enqueue(&sale()).unwrap();
    s.queue.enqueue(&sale()).unwrap();
    s.network.set_online(true);
    s.network.respond(SALES, Response::new(201, "{}"));

    let report = s.sync.run(SyncTrigger::ConnectivityRestored).await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(s.queue.len().unwrap(), 0);
    assert_eq!(sub.try_next(), Some(ClientEvent::SyncComplete { synced_count: 2 }));
    assert_eq!(sub.try_next(), None);
  }

  #[tokio::test]
  async fn test_nothing_synced_means_no_broadcast() {
    let s = setup();
    let mut sub = s.bus.subscribe();
    s.queue.enqueue(&sale()).unwrap();

    let report = s.sync.run(SyncTrigger::PeriodicTick).await.unwrap();
    assert_eq!(report.synced, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(sub.try_next(), None);

    let empty = setup();
    let mut sub = empty.bus.subscribe();
    empty.sync.run(SyncTrigger::Explicit).await.unwrap();
    assert_eq!(sub.try_next(), None);
  }

  #[tokio::test]
  async fn test_retry_count_tracks_failures_and_ceiling() {
    let s = setup();
    let mutation = s.queue.enqueue(&sale()).unwrap();

    for k in 1..=3 {
      let report = s.sync.run(SyncTrigger::PeriodicTick).await.unwrap();
      assert_eq!(report.failed, 1);
      assert_eq!(s.queue.get(&mutation.id).unwrap().unwrap().retry_count, k);
    }
    assert_eq!(s.network.calls_to(SALES), 3);

    // Fourth trigger drops it without replaying, even though we are online now
    s.network.set_online(true);
    s.network.respond(SALES, Response::new(201, "{}"));
    let report = s.sync.run(SyncTrigger::ConnectivityRestored).await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.synced, 0);
    assert!(s.queue.get(&mutation.id).unwrap().is_none());
    assert_eq!(s.network.calls_to(SALES), 3);
  }

  #[tokio::test]
  async fn test_error_status_counts_as_failure() {
    let s = setup();
    let mutation = s.queue.enqueue(&sale()).unwrap();
    s.network.set_online(true);
    s.network.respond(SALES, Response::new(500, "down"));

    let report = s.sync.run(SyncTrigger::Explicit).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(s.queue.get(&mutation.id).unwrap().unwrap().retry_count, 1);
  }

  #[tokio::test]
  async fn test_concurrent_triggers_do_not_duplicate_replays() {
    let s = setup();
    s.queue.enqueue(&sale()).unwrap();
    s.network.set_online(true);
    s.network.respond(SALES, Response::new(200, "{}"));

    let (a, b) = tokio::join!(
      s.sync.run(SyncTrigger::ConnectivityRestored),
      s.sync.run(SyncTrigger::PeriodicTick)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.coalesced ^ b.coalesced);
    assert_eq!(a.synced + b.synced, 1);
    assert_eq!(s.network.calls_to(SALES), 1);
    assert_eq!(s.sync.state(), SyncState::Idle);
  }

  /// Store whose deletes start failing after `ok_deletes` successes.
  struct FailingDeletes {
    inner: SqliteStore,
    ok_deletes: AtomicUsize,
  }

  impl PartitionStore for FailingDeletes {
    fn open_partition(&self, partition: &str) -> StoreResult<()> {
      self.inner.open_partition(partition)
    }
    fn put(&self, partition: &str, key: &str, response: &Response) -> StoreResult<()> {
      self.inner.put(partition, key, response)
    }
    fn get(&self, partition: &str, key: &str) -> StoreResult<Option<CacheEntry>> {
      self.inner.get(partition, key)
    }
    fn find(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
      self.inner.find(key)
    }
    fn delete(&self, partition: &str, key: &str) -> StoreResult<bool> {
      let allowed = self
        .ok_deletes
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok();
      if allowed {
        self.inner.delete(partition, key)
      } else {
        Err(StoreError::LockPoisoned)
      }
    }
    fn entries(&self, partition: &str) -> StoreResult<Vec<CacheEntry>> {
      self.inner.entries(partition)
    }
    fn count(&self, partition: &str) -> StoreResult<usize> {
      self.inner.count(partition)
    }
    fn partitions(&self) -> StoreResult<Vec<String>> {
      self.inner.partitions()
    }
    fn delete_partition(&self, partition: &str) -> StoreResult<bool> {
      self.inner.delete_partition(partition)
    }
  }

  #[tokio::test]
  async fn test_store_fault_does_not_abort_pass() {
    let store = Arc::new(FailingDeletes {
      inner: SqliteStore::open_in_memory().unwrap(),
      ok_deletes: AtomicUsize::new(1),
    });
    let queue = MutationQueue::new(store, "mutations".to_string(), Arc::new(ManualClock::new()));
    let network = Arc::new(FakeNetwork::online());
    network.respond(SALES, Response::new(201, "{}"));
    let bus = EventBus::default();
    let mut sub = bus.subscribe();
    let sync = Synchronizer::new(
      queue.clone(),
      network.clone(),
      bus.clone(),
      3,
      Duration::from_secs(5),
    );
    for _ in 0..3 {
      queue.enqueue(&sale()).unwrap();
    }

    let report = sync.run(SyncTrigger::ConnectivityRestored).await.unwrap();
    assert_eq!(report.synced, 3);
    assert_eq!(network.calls_to(SALES), 3);
    assert_eq!(queue.len().unwrap(), 2);
    assert_eq!(sub.try_next(), Some(ClientEvent::SyncComplete { synced_count: 3 }));
    assert_eq!(sync.state(), SyncState::Idle);
  }

  #[tokio::test]
  async fn test_guard_coalesces_while_draining() {
    let s = setup();
    s.sync.draining.store(true, Ordering::Release);
    assert_eq!(s.sync.state(), SyncState::Draining);

    s.queue.enqueue(&sale()).unwrap();
    let report = s.sync.run(SyncTrigger::Explicit).await.unwrap();
    assert!(report.coalesced);
    assert!(s.network.calls().is_empty());
  }
}
