//! Durable record of which worker version is in which lifecycle state.
//!
//! Only settled states are recorded: installed, activated and redundant.
//! At most one version is activated at a time.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::state::WorkerState;
use crate::db::Database;

/// Trait for worker registration backends.
pub trait RegistrationStorage: Send + Sync {
  /// Record the settled state of `version`.
  fn record_state(&self, version: &str, state: WorkerState) -> Result<()>;

  /// Last recorded state of `version`, if it was ever recorded.
  fn state_of(&self, version: &str) -> Result<Option<WorkerState>>;

  /// The version currently controlling pages.
  fn active_version(&self) -> Result<Option<String>>;

  /// Make `version` the active one and retire the previous one.
  fn promote(&self, version: &str) -> Result<()>;
}

const UPSERT_STATE: &str = "INSERT INTO worker_versions (version, state, updated_at)
   VALUES (?, ?, datetime('now'))
   ON CONFLICT(version) DO UPDATE SET
     state = excluded.state,
     updated_at = excluded.updated_at";

impl RegistrationStorage for Database {
  fn record_state(&self, version: &str, state: WorkerState) -> Result<()> {
    if state == WorkerState::Activated {
      return self.promote(version);
    }

    self
      .conn()?
      .execute(UPSERT_STATE, params![version, state.as_str()])
      .map_err(|e| eyre!("Failed to record state of {}: {}", version, e))?;
    Ok(())
  }

  fn state_of(&self, version: &str) -> Result<Option<WorkerState>> {
    let state: Option<String> = self
      .conn()?
      .query_row(
        "SELECT state FROM worker_versions WHERE version = ?",
        params![version],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read state of {}: {}", version, e))?;

    state.map(|s| s.parse()).transpose()
  }

  fn active_version(&self) -> Result<Option<String>> {
    self
      .conn()?
      .query_row(
        "SELECT version FROM worker_versions WHERE state = 'activated'
         ORDER BY updated_at DESC LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active version: {}", e))
  }

  fn promote(&self, version: &str) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "UPDATE worker_versions SET state = 'redundant', updated_at = datetime('now')
       WHERE state = 'activated' AND version != ?",
      params![version],
    )
    .map_err(|e| eyre!("Failed to retire previous version: {}", e))?;
    tx.execute(UPSERT_STATE, params![version, WorkerState::Activated.as_str()])
      .map_err(|e| eyre!("Failed to activate {}: {}", version, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}
