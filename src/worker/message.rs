use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Messages the controlled page may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Leave the waiting phase immediately
  SkipWaiting,
  /// Delete every named cache regardless of version
  ClearCache,
}

impl ControlMessage {
  pub fn parse(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid control message '{}': {}", json, e))
  }
}
