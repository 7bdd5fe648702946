use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::warn;

/// Events broadcast to every open application instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
  /// A sync pass delivered at least one queued mutation
  #[serde(rename_all = "camelCase")]
  SyncComplete { synced_count: usize },
  /// A new cache generation took control of all instances
  ControlClaimed { version: String },
  /// Push notification to display
  Notification {
    title: String,
    body: String,
    url: String,
  },
}

/// Why a sync pass was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  ConnectivityRestored,
  PeriodicTick,
  Explicit,
}

/// Commands an application instance can post to the service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SkipWaiting,
  ClearCache,
  GetCacheStatus,
  SyncNow,
}

impl ClientMessage {
  /// Decode a posted message. Unknown or malformed messages are dropped.
  pub fn parse(raw: &[u8]) -> Option<Self> {
    match serde_json::from_slice(raw) {
      Ok(message) => Some(message),
      Err(e) => {
        warn!(error = %e, "ignoring malformed client message");
        None
      }
    }
  }
}

/// Reply to a `ClientMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
  /// Partition name -> entry count
  CacheStatus(BTreeMap<String, usize>),
  Cleared { success: bool },
  Ack,
}

/// In-process pub/sub for `ClientEvent`s.
///
/// Instances subscribe at startup and drop their `Subscription` at teardown.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Deliver to every current subscriber. Returns how many there were.
  pub fn publish(&self, event: ClientEvent) -> usize {
    self.tx.send(event).unwrap_or(0)
  }

  pub fn subscribe(&self) -> Subscription {
    Subscription {
      rx: self.tx.subscribe(),
    }
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(64)
  }
}

/// One instance's view of the bus
pub struct Subscription {
  rx: broadcast::Receiver<ClientEvent>,
}

impl Subscription {
  /// Receive the next event. `None` once the bus is gone.
  pub async fn next(&mut self) -> Option<ClientEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "subscriber lagged, events dropped");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Next event if one is already waiting.
  pub fn try_next(&mut self) -> Option<ClientEvent> {
    loop {
      match self.rx.try_recv() {
        Ok(event) => return Some(event),
        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        Err(_) => return None,
      }
    }
  }
}
