use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::queue::{QueueEntry, QueueStorage};
use super::registry::QueueRegistry;
use crate::net::{Fetcher, Request};

/// Outcome of draining one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub queue: String,
  /// Entries replayed successfully and removed
  pub delivered: usize,
  /// Entries left in place for the next resume event
  pub retained: usize,
}

/// Replays queued writes once connectivity returns.
///
/// Delivery is at-least-once: an entry is removed only after the server
/// accepted its replay, so a crash between the two replays it again later.
/// There is no ordering across entries and no deduplication.
pub struct SyncQueueProcessor<F: Fetcher, Q: QueueStorage> {
  fetcher: Arc<F>,
  queues: Arc<Q>,
  registry: QueueRegistry,
}

impl<F: Fetcher, Q: QueueStorage> SyncQueueProcessor<F, Q> {
  pub fn new(fetcher: Arc<F>, queues: Arc<Q>, registry: QueueRegistry) -> Self {
    Self {
      fetcher,
      queues,
      registry,
    }
  }

  pub fn registry(&self) -> &QueueRegistry {
    &self.registry
  }

  /// Producer entry point: append a write that could not reach the network.
  pub fn enqueue(&self, queue: &str, request: &Request) -> Result<i64> {
    if !self.registry.is_queue(queue) {
      return Err(eyre!("Unknown queue: {}", queue));
    }
    let id = self.queues.push(queue, request)?;
    debug!(queue, id, method = %request.method, url = %request.url, "Queued request");
    Ok(id)
  }

  pub fn pending(&self, queue: &str) -> Result<usize> {
    self.queues.len(queue)
  }

  /// Entries of `queue` that could not be decoded and will never be replayed.
  pub fn dead_letters(&self, queue: &str) -> Result<usize> {
    self.queues.dead_letters(queue)
  }

  /// Handle a resume event. Never fails: problems are logged and the queue
  /// is left as it was for the next resume event.
  pub async fn on_sync(&self, tag: &str) -> Option<DrainReport> {
    let Some(queue) = self.registry.queue_for_tag(tag) else {
      warn!(tag, "Ignoring sync event for unknown tag");
      return None;
    };

    match self.drain(queue).await {
      Ok(report) => Some(report),
      Err(e) => {
        error!(queue, "Failed to drain queue: {}", e);
        None
      }
    }
  }

  /// Replay every entry of `queue` once.
  pub async fn drain(&self, queue: &str) -> Result<DrainReport> {
    let entries = self.queues.entries(queue)?;
    let total = entries.len();

    let results = join_all(entries.iter().map(|entry| self.replay(entry))).await;
    let delivered = results.into_iter().filter(|ok| *ok).count();

    let report = DrainReport {
      queue: queue.to_string(),
      delivered,
      retained: total - delivered,
    };
    info!(
      queue,
      delivered = report.delivered,
      retained = report.retained,
      "Drained queue"
    );
    Ok(report)
  }

  /// Replay one entry; true if it was delivered and removed.
  async fn replay(&self, entry: &QueueEntry) -> bool {
    let request = &entry.request;

    match self.fetcher.fetch(request).await {
      Ok(response) if response.is_ok() => match self.queues.remove(entry.id) {
        Ok(_) => {
          debug!(id = entry.id, url = %request.url, "Replayed queued request");
          true
        }
        Err(e) => {
          // Delivered but still queued: it will be replayed again
          warn!(id = entry.id, "Failed to remove replayed entry: {}", e);
          false
        }
      },
      Ok(response) => {
        warn!(
          id = entry.id,
          url = %request.url,
          status = response.status,
          "Server rejected replayed request"
        );
        false
      }
      Err(e) => {
        warn!(id = entry.id, url = %request.url, "Replay failed: {}", e);
        false
      }
    }
  }
}
