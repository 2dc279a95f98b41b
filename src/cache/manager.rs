//! Cache store manager: the only component that mutates named caches.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::names::CacheNames;
use super::storage::{CacheStorage, CachedResponse};
use crate::net::{Fetcher, Request, RequestKey, Response};

/// Owns the named caches of one worker version.
///
/// Reads only ever consult the two current caches, so entries left behind by
/// an older version are never served even before they are purged.
pub struct CacheStoreManager<S: CacheStorage> {
  storage: Arc<S>,
  names: CacheNames,
}

impl<S: CacheStorage + 'static> CacheStoreManager<S> {
  pub fn new(storage: Arc<S>, names: CacheNames) -> Self {
    Self { storage, names }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  /// Open the named cache, creating it if needed.
  pub fn ensure(&self, name: &str) -> Result<()> {
    if name.trim().is_empty() {
      return Err(eyre!("Cache name must not be empty"));
    }
    self.storage.open_cache(name)
  }

  /// Fetch every resource and store them all, or store nothing.
  ///
  /// Any network failure or non-ok status aborts the whole operation before
  /// the cache is written, so a failed populate never leaves a partial cache
  /// behind (and never creates an empty one).
  pub async fn populate<F: Fetcher>(
    &self,
    name: &str,
    fetcher: &F,
    resources: &[Url],
  ) -> Result<usize> {
    if name.trim().is_empty() {
      return Err(eyre!("Cache name must not be empty"));
    }

    let fetches = resources.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = fetcher
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to fetch {}: status {}",
          url,
          response.status
        ));
      }
      Ok((request.key(), response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_entries(name, &entries)?;

    info!(cache = name, count = entries.len(), "Populated cache");
    Ok(entries.len())
  }

  /// Store a copy of `response` under `key`; the caller keeps its response.
  pub fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.ensure(name)?;
    self.storage.put_entry(name, key, response)
  }

  /// Persist a response on a separate task.
  ///
  /// The write is issued before this returns, but its completion races
  /// whatever the caller does next. Failures are logged and otherwise
  /// swallowed: an uncached response is still a valid response.
  pub fn put_in_background(
    &self,
    name: &str,
    key: RequestKey,
    response: Response,
  ) -> JoinHandle<()> {
    let manager = self.clone();
    let name = name.to_string();

    tokio::task::spawn_blocking(move || match manager.put(&name, &key, &response) {
      Ok(()) => debug!(cache = %name, key = %key, "Cached response"),
      Err(e) => warn!(cache = %name, key = %key, "Failed to cache response: {}", e),
    })
  }

  /// Look up `key` in the current static cache, then the runtime cache.
  pub fn match_key(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    for name in self.names.current() {
      if let Some(hit) = self.storage.get_entry(name, key)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }

  /// Look up `key` in one named cache only.
  pub fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.storage.get_entry(name, key)
  }

  /// Delete every cache whose name is not in `current`. Returns the deleted names.
  pub fn purge_stale(&self, current: &[&str]) -> Result<Vec<String>> {
    let mut deleted = Vec::new();

    for name in self.storage.cache_names()? {
      if current.contains(&name.as_str()) {
        continue;
      }
      match self.storage.delete_cache(&name) {
        Ok(_) => {
          info!(cache = %name, "Deleted stale cache");
          deleted.push(name);
        }
        Err(e) => warn!(cache = %name, "Failed to delete stale cache: {}", e),
      }
    }

    Ok(deleted)
  }

  /// Delete every named cache regardless of version.
  pub fn clear_all(&self) -> Result<Vec<String>> {
    self.purge_stale(&[])
  }

  pub fn cache_names(&self) -> Result<Vec<String>> {
    self.storage.cache_names()
  }

  pub fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
    self.storage.entry_keys(name)
  }
}

impl<S: CacheStorage> Clone for CacheStoreManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: self.names.clone(),
    }
  }
}
