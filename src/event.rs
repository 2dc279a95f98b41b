use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::net::{Fetcher, Request};
use crate::notify::Notification;
use crate::strategy::FetchOutcome;
use crate::sync::DrainReport;
use crate::worker::{Client, ControlMessage, LifecycleController, WorkerState, WorkerStorage};

/// Events the host delivers to the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// A page issued a network request
  Fetch {
    request: Request,
    client_id: Option<String>,
  },
  Message(ControlMessage),
  /// A producer stores a write that could not reach the network
  Enqueue { queue: String, request: Request },
  /// Connectivity is back for the queue behind `tag`
  Sync { tag: String },
  Push { payload: Option<String> },
  NotificationClick {
    notification: Notification,
    action: Option<String>,
  },
}

/// How the worker finished an event
#[derive(Debug)]
pub enum EventOutcome {
  Completed(WorkerState),
  Failed(String),
  /// Not intercepted; the host performs the request itself
  Passthrough,
  Responded(FetchOutcome),
  Enqueued(i64),
  Synced(DrainReport),
  SyncSkipped,
  Notified(Notification),
  WindowOpened(Client),
  Dismissed,
}

type Envelope = (WorkerEvent, oneshot::Sender<EventOutcome>);

/// Delivers events to a worker, each on its own task so slow fetches never
/// hold up the rest.
pub struct WorkerHost {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl WorkerHost {
  pub fn spawn<F, S>(worker: Arc<LifecycleController<F, S>>) -> Self
  where
    F: Fetcher + 'static,
    S: WorkerStorage + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    tokio::spawn(async move {
      while let Some((event, reply)) = rx.recv().await {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
          let outcome = worker.dispatch(event).await;
          if reply.send(outcome).is_err() {
            debug!("Event outcome dropped, nobody waiting");
          }
        });
      }
    });

    Self { tx }
  }

  /// Queue an event; the receiver resolves when the worker is done with it.
  pub fn dispatch(&self, event: WorkerEvent) -> Result<oneshot::Receiver<EventOutcome>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send((event, reply))
      .map_err(|_| eyre!("Worker host has shut down"))?;
    Ok(rx)
  }

  /// Deliver an event and wait for its outcome
  pub async fn send(&self, event: WorkerEvent) -> Result<EventOutcome> {
    self
      .dispatch(event)?
      .await
      .map_err(|_| eyre!("Worker task ended without replying"))
  }
}
