//! The worker itself: lifecycle, control messages and event dispatch.

mod clients;
mod message;
mod registration;
mod state;

pub use clients::{Client, Clients};
pub use message::ControlMessage;
pub use registration::RegistrationStorage;
pub use state::WorkerState;

use color_eyre::{
  eyre::{eyre, Report},
  Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheNames, CacheStorage, CacheStoreManager};
use crate::config::Config;
use crate::event::{EventOutcome, WorkerEvent};
use crate::net::{Fetcher, Request};
use crate::notify::{Notification, NotificationBridge, NotificationSink};
use crate::strategy::{FetchOutcome, StrategyEngine};
use crate::sync::{DrainReport, QueueRegistry, QueueStorage, SyncQueueProcessor};

/// Everything the worker persists: caches, queues and version records.
pub trait WorkerStorage: CacheStorage + QueueStorage + RegistrationStorage {}

impl<T: CacheStorage + QueueStorage + RegistrationStorage> WorkerStorage for T {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
  pub name: String,
  pub entries: usize,
  /// Belongs to this build's version
  pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSummary {
  pub name: String,
  pub pending: usize,
  pub dead_letters: usize,
}

/// Snapshot of what the worker holds, for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
  pub version: String,
  pub state: WorkerState,
  /// Version whose caches answer intercepted requests
  pub active_version: Option<String>,
  pub caches: Vec<CacheSummary>,
  pub queues: Vec<QueueSummary>,
  pub pages: usize,
}

/// The version that controls pages and the engine reading its caches.
struct Serving<F: Fetcher, S: CacheStorage> {
  version: String,
  engine: Arc<StrategyEngine<F, S>>,
}

/// Orchestrates install, activation and control takeover, and routes every
/// other event to the component that owns it.
///
/// `state` tracks this build's version. Interception goes through whichever
/// version is active, which may be an older one while this one installs or
/// waits.
pub struct LifecycleController<F, S>
where
  F: Fetcher + 'static,
  S: WorkerStorage + 'static,
{
  config: Config,
  state: RwLock<WorkerState>,
  skip_waiting: AtomicBool,
  shell: Vec<Url>,
  fetcher: Arc<F>,
  storage: Arc<S>,
  cache: CacheStoreManager<S>,
  engine: Arc<StrategyEngine<F, S>>,
  serving: RwLock<Option<Serving<F, S>>>,
  sync: SyncQueueProcessor<F, S>,
  notifications: NotificationBridge,
  clients: RwLock<Clients>,
}

impl<F, S> LifecycleController<F, S>
where
  F: Fetcher + 'static,
  S: WorkerStorage + 'static,
{
  pub fn new(
    config: &Config,
    fetcher: Arc<F>,
    storage: Arc<S>,
    notifier: Arc<dyn NotificationSink>,
  ) -> Result<Self> {
    let names = CacheNames::new(&config.caches, &config.version);
    let cache = CacheStoreManager::new(Arc::clone(&storage), names);
    let engine = StrategyEngine::new(config, cache.clone(), Arc::clone(&fetcher))?;
    let sync = SyncQueueProcessor::new(
      Arc::clone(&fetcher),
      Arc::clone(&storage),
      QueueRegistry::new(&config.sync),
    );

    Ok(Self {
      config: config.clone(),
      state: RwLock::new(WorkerState::Parsed),
      skip_waiting: AtomicBool::new(config.skip_waiting),
      shell: config.shell_urls()?,
      fetcher,
      storage,
      cache,
      engine: Arc::new(engine),
      serving: RwLock::new(None),
      sync,
      notifications: NotificationBridge::new(config, notifier)?,
      clients: RwLock::new(Clients::new()),
    })
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  pub async fn state(&self) -> WorkerState {
    *self.state.read().await
  }

  pub async fn active_version(&self) -> Option<String> {
    self.serving.read().await.as_ref().map(|s| s.version.clone())
  }

  /// Move this version to a settled state and record it.
  async fn settle(&self, state: WorkerState) {
    *self.state.write().await = state;
    info!(version = %self.version(), %state, "Worker state changed");

    if let Err(e) = self.storage.record_state(self.version(), state) {
      warn!(version = %self.version(), "Failed to record worker state: {}", e);
    }
  }

  /// Engine over the caches of another version.
  fn engine_for(&self, version: &str) -> Result<Arc<StrategyEngine<F, S>>> {
    if version == self.version() {
      return Ok(Arc::clone(&self.engine));
    }
    let names = CacheNames::new(&self.config.caches, version);
    let cache = CacheStoreManager::new(Arc::clone(&self.storage), names);
    let engine = StrategyEngine::new(&self.config, cache, Arc::clone(&self.fetcher))?;
    Ok(Arc::new(engine))
  }

  /// Pick up where a previous context left off. The host may tear the
  /// context down between events; the recorded registrations say which
  /// version serves and how far this one got.
  pub async fn resume(&self) -> Result<WorkerState> {
    if let Some(state) = self.storage.state_of(self.version())? {
      *self.state.write().await = state;
    }

    if let Some(version) = self.storage.active_version()? {
      let static_name = CacheNames::new(&self.config.caches, &version).static_name;
      if !self.storage.has_cache(&static_name)? {
        warn!(%version, cache = %static_name, "Shell cache missing, navigations rely on the network");
      }
      let engine = self.engine_for(&version)?;
      debug!(%version, "Resumed active worker");
      *self.serving.write().await = Some(Serving { version, engine });
      self.clients.write().await.claim();
    }

    Ok(self.state().await)
  }

  /// Populate the shell cache. Any missing shell resource fails the install
  /// and leaves this version redundant; a version already serving keeps
  /// serving.
  pub async fn install(&self) -> Result<()> {
    let refresh = {
      let mut state = self.state.write().await;
      let current = *state;
      match current {
        WorkerState::Installing | WorkerState::Activating => {
          return Err(eyre!("Cannot install while {}", current));
        }
        WorkerState::Activated => true,
        _ => {
          *state = WorkerState::Installing;
          false
        }
      }
    };
    info!(version = %self.version(), resources = self.shell.len(), refresh, "Installing");

    let static_name = self.cache.names().static_name.clone();
    let populated = self
      .cache
      .populate(&static_name, self.fetcher.as_ref(), &self.shell)
      .await;

    if refresh {
      let count = populated.map_err(|e| e.wrap_err("Shell refresh failed"))?;
      info!(cache = %static_name, count, "Refreshed application shell");
      return Ok(());
    }

    match populated {
      Ok(count) => info!(cache = %static_name, count, "Cached application shell"),
      Err(e) => {
        self.settle(WorkerState::Redundant).await;
        return Err(e.wrap_err("Install failed"));
      }
    }

    self.settle(WorkerState::Installed).await;

    if self.skip_waiting.load(Ordering::SeqCst) {
      self.activate().await?;
    }
    Ok(())
  }

  /// Retire the previous version, delete every cache not belonging to this
  /// one and take control of open pages. Activating an active worker is a
  /// no-op.
  pub async fn activate(&self) -> Result<()> {
    {
      let mut state = self.state.write().await;
      let current = *state;
      match current {
        WorkerState::Installed => *state = WorkerState::Activating,
        WorkerState::Activating | WorkerState::Activated => {
          debug!(state = %current, "Already active");
          return Ok(());
        }
        other => return Err(eyre!("Cannot activate while {}", other)),
      }
    }

    if let Err(e) = self.storage.promote(self.version()) {
      *self.state.write().await = WorkerState::Installed;
      return Err(e.wrap_err("Activation failed"));
    }

    let current = self.cache.names().current();
    match self.cache.purge_stale(&current) {
      Ok(deleted) if !deleted.is_empty() => info!(?deleted, "Purged stale caches"),
      Ok(_) => {}
      Err(e) => warn!("Failed to purge stale caches: {}", e),
    }

    *self.serving.write().await = Some(Serving {
      version: self.version().to_string(),
      engine: Arc::clone(&self.engine),
    });
    let claimed = self.clients.write().await.claim();
    debug!(claimed, "Claimed clients");

    *self.state.write().await = WorkerState::Activated;
    info!(version = %self.version(), state = %WorkerState::Activated, "Worker state changed");
    Ok(())
  }

  /// Leave the waiting phase now, or as soon as an in-flight install ends.
  pub async fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.store(true, Ordering::SeqCst);
    if self.state().await == WorkerState::Installed {
      self.activate().await?;
    }
    Ok(())
  }

  /// Track a page. Pages opened while some version is active are
  /// controlled from the start.
  pub async fn open_page(&self, url: Url) -> Client {
    let controlled = self.serving.read().await.is_some();
    self.clients.write().await.add(url, controlled)
  }

  pub async fn close_page(&self, id: &str) -> Option<Client> {
    self.clients.write().await.remove(id)
  }

  /// Intercept a page request. `None` means the host should let the request
  /// through untouched.
  pub async fn on_fetch(&self, request: &Request, client_id: Option<&str>) -> Option<FetchOutcome> {
    let engine = match self.serving.read().await.as_ref() {
      Some(serving) => Arc::clone(&serving.engine),
      None => {
        debug!(url = %request.url, "No active worker, not intercepting");
        return None;
      }
    };

    if let Some(id) = client_id {
      if !self.clients.read().await.is_controlled(id) {
        debug!(client = id, url = %request.url, "Client not controlled");
        return None;
      }
    }

    engine.handle(request).await
  }

  pub async fn on_message(&self, message: ControlMessage) -> Result<()> {
    debug!(?message, "Control message");
    match message {
      ControlMessage::SkipWaiting => self.skip_waiting().await,
      ControlMessage::ClearCache => {
        let deleted = self.cache.clear_all()?;
        info!(count = deleted.len(), "Cleared all caches");
        Ok(())
      }
    }
  }

  pub fn enqueue(&self, queue: &str, request: &Request) -> Result<i64> {
    self.sync.enqueue(queue, request)
  }

  pub async fn on_sync(&self, tag: &str) -> Option<DrainReport> {
    self.sync.on_sync(tag).await
  }

  pub fn on_push(&self, payload: Option<&str>) -> Notification {
    self.notifications.on_push(payload)
  }

  /// The notification the bridge would show for `payload`, without showing it.
  pub fn compose_notification(&self, payload: Option<&str>) -> Notification {
    self.notifications.compose(payload)
  }

  /// Returns the window brought to the front, if the interaction asked for one.
  pub async fn on_notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Option<Client> {
    let url = self.notifications.on_click(notification, action)?;
    Some(self.clients.write().await.open_window(url))
  }

  pub async fn status(&self) -> Result<StatusReport> {
    let names = self.cache.names();
    let mut caches = Vec::new();
    for name in self.cache.cache_names()? {
      caches.push(CacheSummary {
        entries: self.cache.entry_keys(&name)?.len(),
        current: names.is_current(&name),
        name,
      });
    }

    let mut queues = Vec::new();
    for queue in self.sync.registry().queues() {
      queues.push(QueueSummary {
        name: queue.to_string(),
        pending: self.sync.pending(queue)?,
        dead_letters: self.sync.dead_letters(queue)?,
      });
    }

    Ok(StatusReport {
      version: self.version().to_string(),
      state: self.state().await,
      active_version: self.active_version().await,
      caches,
      queues,
      pages: self.clients.read().await.len(),
    })
  }

  /// Run one event to completion. Nothing escapes: failures are logged and
  /// reported as `EventOutcome::Failed`.
  pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
    match event {
      WorkerEvent::Install => match self.install().await {
        Ok(()) => EventOutcome::Completed(self.state().await),
        Err(e) => failed("install", e),
      },
      WorkerEvent::Activate => match self.activate().await {
        Ok(()) => EventOutcome::Completed(self.state().await),
        Err(e) => failed("activate", e),
      },
      WorkerEvent::Fetch { request, client_id } => {
        match self.on_fetch(&request, client_id.as_deref()).await {
          Some(outcome) => EventOutcome::Responded(outcome),
          None => EventOutcome::Passthrough,
        }
      }
      WorkerEvent::Message(message) => match self.on_message(message).await {
        Ok(()) => EventOutcome::Completed(self.state().await),
        Err(e) => failed("message", e),
      },
      WorkerEvent::Enqueue { queue, request } => match self.enqueue(&queue, &request) {
        Ok(id) => EventOutcome::Enqueued(id),
        Err(e) => failed("enqueue", e),
      },
      WorkerEvent::Sync { tag } => match self.on_sync(&tag).await {
        Some(report) => EventOutcome::Synced(report),
        None => EventOutcome::SyncSkipped,
      },
      WorkerEvent::Push { payload } => EventOutcome::Notified(self.on_push(payload.as_deref())),
      WorkerEvent::NotificationClick {
        notification,
        action,
      } => match self
        .on_notification_click(&notification, action.as_deref())
        .await
      {
        Some(client) => EventOutcome::WindowOpened(client),
        None => EventOutcome::Dismissed,
      },
    }
  }
}

fn failed(event: &str, e: Report) -> EventOutcome {
  error!(event, "Event failed: {:#}", e);
  EventOutcome::Failed(format!("{:#}", e))
}
