//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use crate::db::{parse_datetime, Database};
use crate::net::{Headers, RequestKey, Response, ResponseType};

/// A response read back from a named cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for named-cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist.
  fn open_cache(&self, name: &str) -> Result<()>;

  fn has_cache(&self, name: &str) -> Result<bool>;

  /// All cache names, sorted.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and every entry in it. Returns false if it did not exist.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Store (or overwrite) one entry, creating the cache if needed.
  fn put_entry(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several entries in one transaction; either all land or none do
  /// and the cache is not created.
  fn put_entries(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  fn get_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Display keys (`METHOD url`) of every entry in a cache, sorted by URL.
  fn entry_keys(&self, name: &str) -> Result<Vec<String>>;
}

fn open_cache(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO named_caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
  Ok(())
}

fn put_entry(conn: &Connection, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_vec(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_hash, method, url, status, status_text, response_type,
          response_url, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        key.hash(),
        key.method(),
        key.url(),
        response.status,
        response.status_text,
        response.response_type.as_str(),
        response.url.as_ref().map(Url::as_str),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, name, e))?;

  Ok(())
}

impl CacheStorage for Database {
  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    open_cache(&conn, name)
  }

  fn has_cache(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM named_caches WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM named_caches ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM named_caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put_entry(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    open_cache(&tx, name)?;
    put_entry(&tx, name, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_entries(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    open_cache(&tx, name)?;
    for (key, response) in entries {
      put_entry(&tx, name, key, response)?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn get_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, response_type, response_url, headers, body, cached_at
         FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (u16, String, String, Option<String>, Vec<u8>, Vec<u8>, String);
    let row: Option<Row> = stmt
      .query_row(params![name, key.hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {} from {}: {}", key, name, e))?;

    let Some((status, status_text, response_type, response_url, headers, body, cached_at)) = row
    else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_slice(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
    let response_type: ResponseType = response_type
      .parse()
      .map_err(|e| eyre!("Corrupt entry {}: {}", key, e))?;
    let url = response_url.and_then(|u| Url::parse(&u).ok());

    Ok(Some(CachedResponse {
      response: Response {
        status,
        status_text,
        headers,
        body,
        response_type,
        url,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url, method",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| {
        let method: String = row.get(0)?;
        let url: String = row.get(1)?;
        Ok(format!("{} {}", method, url))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }
}
