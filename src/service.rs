//! The resilience service shared by every open application instance.
//!
//! One `Service` is built per host process. Instances address it through a
//! cloneable `ServiceHandle`; the service task owns the periodic sync tick and
//! the connectivity probe.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheSource, PartitionStore};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{NetworkError, ServiceError, StoreResult};
use crate::event::{ClientEvent, ClientMessage, EventBus, MessageReply, Subscription, SyncTrigger};
use crate::http::Request;
use crate::lifecycle::{InstallReport, Lifecycle, LifecycleState};
use crate::net::Transport;
use crate::push;
use crate::queue::MutationQueue;
use crate::router::{classify, Route};
use crate::strategy::{Served, Strategies};
use crate::sync::{SyncReport, Synchronizer};

/// What the service did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
  /// Answered by a strategy
  Respond(Served),
  /// Not intercepted; the caller sends it itself
  Bypass,
}

struct Inner {
  config: Config,
  store: Arc<dyn PartitionStore>,
  transport: Arc<dyn Transport>,
  strategies: Strategies,
  queue: MutationQueue,
  sync: Synchronizer,
  lifecycle: Lifecycle,
  bus: EventBus,
  online: AtomicBool,
}

#[derive(Clone)]
pub struct Service {
  inner: Arc<Inner>,
}

impl Service {
  pub fn new(
    config: Config,
    store: Arc<dyn PartitionStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
  ) -> color_eyre::Result<Self> {
    let bus = EventBus::default();
    let queue = MutationQueue::new(store.clone(), config.partitions().mutations, clock.clone());
    let strategies = Strategies::new(
      &config,
      store.clone(),
      transport.clone(),
      clock,
      queue.clone(),
    )?;
    let sync = Synchronizer::new(
      queue.clone(),
      transport.clone(),
      bus.clone(),
      config.policy.max_retries,
      config.timeouts.api(),
    );
    let lifecycle = Lifecycle::new(&config, store.clone(), transport.clone(), bus.clone())?;

    Ok(Self {
      inner: Arc::new(Inner {
        config,
        store,
        transport,
        strategies,
        queue,
        sync,
        lifecycle,
        bus,
        online: AtomicBool::new(true),
      }),
    })
  }

  pub fn subscribe(&self) -> Subscription {
    self.inner.bus.subscribe()
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.inner.queue
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.inner.lifecycle.state()
  }

  /// Install this generation, and activate it unless configured to wait for
  /// `SKIP_WAITING`.
  pub async fn start(&self) -> StoreResult<InstallReport> {
    let report = self.inner.lifecycle.install().await?;
    if self.inner.config.lifecycle.skip_waiting {
      self.inner.lifecycle.activate()?;
    }
    Ok(report)
  }

  /// Route one request through its strategy.
  ///
  /// Only static assets can fail, and only when neither cache nor network
  /// has them.
  pub async fn fetch(&self, request: &Request) -> Result<Dispatch, NetworkError> {
    let strategies = &self.inner.strategies;
    let route = classify(request, &self.inner.config.cache.api_prefix);
    debug!(method = %request.method, url = %request.url, ?route, "fetch");

    let served = match route {
      Route::Bypass => return Ok(Dispatch::Bypass),
      Route::Api => strategies.api(request).await,
      Route::Image => strategies.image(request).await,
      Route::Navigation => strategies.navigation(request).await,
      Route::Static => strategies.static_asset(request).await?,
    };
    Ok(Dispatch::Respond(served))
  }

  /// Entry counts of every existing partition.
  pub fn cache_status(&self) -> StoreResult<BTreeMap<String, usize>> {
    let mut status = BTreeMap::new();
    for name in self.inner.store.partitions()? {
      let count = self.inner.store.count(&name)?;
      status.insert(name, count);
    }
    Ok(status)
  }

  /// Delete every partition, queued mutations included.
  pub fn clear_all(&self) -> StoreResult<()> {
    for name in self.inner.store.partitions()? {
      self.inner.store.delete_partition(&name)?;
    }
    info!("all caches cleared");
    Ok(())
  }

  pub async fn sync(&self, trigger: SyncTrigger) -> StoreResult<SyncReport> {
    self.inner.sync.run(trigger).await
  }

  /// Periodic tick: drain the queue, then refresh critical data.
  pub async fn periodic(&self) -> StoreResult<SyncReport> {
    let report = self.sync(SyncTrigger::PeriodicTick).await?;
    if self.inner.online.load(Ordering::Acquire) {
      self.refresh_critical().await;
    }
    Ok(report)
  }

  /// Re-fetch the configured critical endpoints so the dynamic partition
  /// stays warm. Returns how many came back from the network.
  pub async fn refresh_critical(&self) -> usize {
    let mut refreshed = 0;
    for path in &self.inner.config.policy.refresh_paths {
      let url = match self.inner.config.resolve(path) {
        Ok(url) => url,
        Err(e) => {
          warn!(path, error = %e, "skipping invalid refresh path");
          continue;
        }
      };
      let served = self.inner.strategies.api(&Request::get(url)).await;
      if served.source == CacheSource::Network && served.response.is_success() {
        refreshed += 1;
      }
    }
    debug!(refreshed, "critical data refreshed");
    refreshed
  }

  /// Record connectivity; an offline to online transition starts a sync.
  pub async fn set_online(&self, online: bool) -> Option<SyncReport> {
    let was_online = self.inner.online.swap(online, Ordering::AcqRel);
    if was_online == online {
      return None;
    }

    if !online {
      info!("connectivity lost");
      return None;
    }

    info!("connectivity restored");
    match self.sync(SyncTrigger::ConnectivityRestored).await {
      Ok(report) => Some(report),
      Err(e) => {
        error!(error = %e, "sync after reconnect failed");
        None
      }
    }
  }

  /// Whether the origin answers at all.
  pub async fn probe(&self) -> bool {
    let url = match self.inner.config.resolve(&self.inner.config.sync.probe_path) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "invalid probe path");
        return false;
      }
    };
    self
      .inner
      .transport
      .send(&Request::get(url), self.inner.config.timeouts.resource())
      .await
      .is_ok()
  }

  /// Broadcast a push payload as a notification.
  pub fn push(&self, raw: &[u8]) -> ClientEvent {
    let event = push::notification(raw);
    self.inner.bus.publish(event.clone());
    event
  }

  /// Answer a client message. Store faults become a negative reply.
  pub async fn handle_message(&self, message: ClientMessage) -> MessageReply {
    match message {
      ClientMessage::SkipWaiting => {
        if let Err(e) = self.inner.lifecycle.skip_waiting() {
          error!(error = %e, "activation failed");
        }
        MessageReply::Ack
      }
      ClientMessage::ClearCache => match self.clear_all() {
        Ok(()) => MessageReply::Cleared { success: true },
        Err(e) => {
          error!(error = %e, "clearing caches failed");
          MessageReply::Cleared { success: false }
        }
      },
      ClientMessage::GetCacheStatus => match self.cache_status() {
        Ok(status) => MessageReply::CacheStatus(status),
        Err(e) => {
          error!(error = %e, "reading cache status failed");
          MessageReply::CacheStatus(BTreeMap::new())
        }
      },
      ClientMessage::SyncNow => {
        if let Err(e) = self.sync(SyncTrigger::Explicit).await {
          error!(error = %e, "explicit sync failed");
        }
        MessageReply::Ack
      }
    }
  }

  /// Start the service task. It stops once every handle is dropped.
  pub fn spawn(self) -> (ServiceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = ServiceHandle {
      tx,
      bus: self.inner.bus.clone(),
    };
    let task = tokio::spawn(self.run(rx));
    (handle, task)
  }

  async fn run(self, mut rx: mpsc::Receiver<Command>) {
    let sync_every = Duration::from_secs(self.inner.config.sync.interval_secs.max(1));
    let probe_every = Duration::from_secs(self.inner.config.sync.probe_interval_secs.max(1));
    let mut sync_tick = interval_at(Instant::now() + sync_every, sync_every);
    let mut probe_tick = interval_at(Instant::now() + probe_every, probe_every);
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    probe_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("service running");
    loop {
      tokio::select! {
        command = rx.recv() => match command {
          Some(command) => self.dispatch(command),
          None => break,
        },
        _ = sync_tick.tick() => {
          let service = self.clone();
          tokio::spawn(async move {
            if let Err(e) = service.periodic().await {
              error!(error = %e, "periodic sync failed");
            }
          });
        }
        _ = probe_tick.tick() => {
          let service = self.clone();
          tokio::spawn(async move {
            let online = service.probe().await;
            service.set_online(online).await;
          });
        }
      }
    }
    info!("service stopped");
  }

  /// Each command runs on its own task so a slow fetch never blocks others.
  fn dispatch(&self, command: Command) {
    let service = self.clone();
    tokio::spawn(async move {
      match command {
        Command::Fetch { request, reply } => {
          let _ = reply.send(service.fetch(&request).await);
        }
        Command::Message { message, reply } => {
          let _ = reply.send(service.handle_message(message).await);
        }
        Command::Connectivity { online } => {
          service.set_online(online).await;
        }
        Command::Push { payload } => {
          service.push(&payload);
        }
      }
    });
  }
}

enum Command {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Dispatch, NetworkError>>,
  },
  Message {
    message: ClientMessage,
    reply: oneshot::Sender<MessageReply>,
  },
  Connectivity {
    online: bool,
  },
  Push {
    payload: Vec<u8>,
  },
}

/// Cloneable address of a running service
#[derive(Clone)]
pub struct ServiceHandle {
  tx: mpsc::Sender<Command>,
  bus: EventBus,
}

impl ServiceHandle {
  pub async fn fetch(&self, request: Request) -> Result<Dispatch, ServiceError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Command::Fetch { request, reply })
      .await
      .map_err(|_| ServiceError::Stopped)?;
    Ok(rx.await.map_err(|_| ServiceError::Stopped)??)
  }

  pub async fn post(&self, message: ClientMessage) -> Result<MessageReply, ServiceError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Command::Message { message, reply })
      .await
      .map_err(|_| ServiceError::Stopped)?;
    rx.await.map_err(|_| ServiceError::Stopped)
  }

  /// Post a raw JSON message; malformed ones are ignored.
  pub async fn post_raw(&self, raw: &[u8]) -> Result<Option<MessageReply>, ServiceError> {
    match ClientMessage::parse(raw) {
      Some(message) => self.post(message).await.map(Some),
      None => Ok(None),
    }
  }

  pub async fn connectivity_changed(&self, online: bool) -> Result<(), ServiceError> {
    self
      .tx
      .send(Command::Connectivity { online })
      .await
      .map_err(|_| ServiceError::Stopped)
  }

  pub async fn push(&self, payload: Vec<u8>) -> Result<(), ServiceError> {
    self
      .tx
      .send(Command::Push { payload })
      .await
      .map_err(|_| ServiceError::Stopped)
  }

  pub fn subscribe(&self) -> Subscription {
    self.bus.subscribe()
  }
}
