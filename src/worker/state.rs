use color_eyre::{
  eyre::{eyre, Report},
  Result,
};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, nothing run yet
  #[default]
  Parsed,
  /// Populating the shell cache
  Installing,
  /// Installed, waiting to take over
  Installed,
  /// Purging stale caches and claiming pages
  Activating,
  /// Controlling pages and intercepting their requests
  Activated,
  /// Install failed or a newer version took over; never serves again
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    }
  }
}

impl FromStr for WorkerState {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "parsed" => Ok(WorkerState::Parsed),
      "installing" => Ok(WorkerState::Installing),
      "installed" => Ok(WorkerState::Installed),
      "activating" => Ok(WorkerState::Activating),
      "activated" => Ok(WorkerState::Activated),
      "redundant" => Ok(WorkerState::Redundant),
      other => Err(eyre!("Unknown worker state: {}", other)),
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
