use std::collections::BTreeMap;

use crate::config::SyncConfig;

/// Maps sync tags (carried by resume events) to pending-request queues.
///
/// Adding a write type means adding one tag/queue pair to configuration.
#[derive(Debug, Clone)]
pub struct QueueRegistry {
  tags: BTreeMap<String, String>,
}

impl QueueRegistry {
  pub fn new(config: &SyncConfig) -> Self {
    Self {
      tags: config.queues.clone(),
    }
  }

  pub fn queue_for_tag(&self, tag: &str) -> Option<&str> {
    self.tags.get(tag).map(String::as_str)
  }

  pub fn is_queue(&self, name: &str) -> bool {
    self.tags.values().any(|q| q == name)
  }

  pub fn queues(&self) -> impl Iterator<Item = &str> {
    self.tags.values().map(String::as_str)
  }
}
