//! Pending-request queue storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::db::{parse_datetime, Database};
use crate::net::Request;

/// A write waiting to be replayed.
#[derive(Debug, Clone)]
pub struct QueueEntry {
  pub id: i64,
  pub queue: String,
  pub request: Request,
  pub enqueued_at: DateTime<Utc>,
}

/// Trait for pending-request queue backends.
pub trait QueueStorage: Send + Sync {
  /// Append a request; returns the new entry id.
  fn push(&self, queue: &str, request: &Request) -> Result<i64>;

  /// Every entry of a queue, oldest first.
  fn entries(&self, queue: &str) -> Result<Vec<QueueEntry>>;

  /// Remove an entry. Removing an entry that is already gone is not an error.
  fn remove(&self, id: i64) -> Result<bool>;

  fn len(&self, queue: &str) -> Result<usize>;

  /// Entries of a queue that could not be decoded and were set aside.
  fn dead_letters(&self, queue: &str) -> Result<usize>;
}

type RawEntry = (i64, Vec<u8>, String);

fn read_raw_entries(conn: &Connection, queue: &str) -> Result<Vec<RawEntry>> {
  let mut stmt = conn
    .prepare(
      "SELECT id, request, enqueued_at FROM pending_requests
       WHERE queue_name = ?
       ORDER BY id",
    )
    .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

  let rows = stmt
    .query_map(params![queue], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
    .map_err(|e| eyre!("Failed to read queue {}: {}", queue, e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read queue {}: {}", queue, e))?;

  Ok(rows)
}

/// Move undecodable entries out of the queue so they are never replayed
/// and never silently retried.
fn move_to_dead_letters(
  conn: &mut Connection,
  queue: &str,
  corrupt: &[(RawEntry, String)],
) -> Result<()> {
  let tx = conn
    .transaction()
    .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

  for ((id, data, enqueued_at), reason) in corrupt {
    tx.execute(
      "INSERT OR REPLACE INTO dead_letters (id, queue_name, request, reason, enqueued_at)
       VALUES (?, ?, ?, ?, ?)",
      params![id, queue, data, reason, enqueued_at],
    )
    .map_err(|e| eyre!("Failed to dead-letter entry {}: {}", id, e))?;
    tx.execute("DELETE FROM pending_requests WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove entry {}: {}", id, e))?;
  }

  tx.commit()
    .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
  Ok(())
}

impl QueueStorage for Database {
  fn push(&self, queue: &str, request: &Request) -> Result<i64> {
    let data =
      serde_json::to_vec(request).map_err(|e| eyre!("Failed to serialize request: {}", e))?;

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO pending_requests (queue_name, request, enqueued_at)
         VALUES (?, ?, datetime('now'))",
        params![queue, data],
      )
      .map_err(|e| eyre!("Failed to enqueue into {}: {}", queue, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn entries(&self, queue: &str) -> Result<Vec<QueueEntry>> {
    let mut conn = self.conn()?;
    let rows = read_raw_entries(&conn, queue)?;

    let mut entries = Vec::with_capacity(rows.len());
    let mut corrupt = Vec::new();
    for raw in rows {
      let decoded = serde_json::from_slice::<Request>(&raw.1);
      match decoded {
        Ok(request) => entries.push(QueueEntry {
          id: raw.0,
          queue: queue.to_string(),
          request,
          enqueued_at: parse_datetime(&raw.2)?,
        }),
        Err(e) => {
          warn!(queue, id = raw.0, "Moving unreadable queue entry to dead letters: {}", e);
          corrupt.push((raw, e.to_string()));
        }
      }
    }

    if !corrupt.is_empty() {
      // Left in place on failure; the next read tries again
      if let Err(e) = move_to_dead_letters(&mut conn, queue, &corrupt) {
        warn!(queue, "Failed to move unreadable entries: {}", e);
      }
    }

    Ok(entries)
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute("DELETE FROM pending_requests WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queue entry {}: {}", id, e))?;
    Ok(removed > 0)
  }

  fn len(&self, queue: &str) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM pending_requests WHERE queue_name = ?",
        params![queue],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count queue {}: {}", queue, e))?;
    Ok(count as usize)
  }

  fn dead_letters(&self, queue: &str) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM dead_letters WHERE queue_name = ?",
        params![queue],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count dead letters of {}: {}", queue, e))?;
    Ok(count as usize)
  }
}
