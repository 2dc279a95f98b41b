//! Executes the strategy chosen for each intercepted request.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::allow_list::ApiAllowList;
use super::policy::{is_cacheable, is_cacheable_asset, RoutePolicy, Strategy};
use crate::cache::{CacheStorage, CacheStoreManager};
use crate::config::Config;
use crate::net::{Fetcher, Request, RequestKey, Response};

/// Where the response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// The reserved offline page, served for a failed navigation
  OfflinePage,
  /// Synthesized 503 JSON for a failed API read
  OfflineEnvelope,
  /// Network failed and nothing could stand in for it
  NetworkError,
}

/// Result of one intercepted fetch.
///
/// The response and the optional cache write are independent continuations:
/// the response can be delivered immediately while the write finishes on its
/// own task.
#[derive(Debug)]
pub struct FetchOutcome {
  pub response: Response,
  pub source: ResponseSource,
  pub strategy: Strategy,
  cache_write: Option<JoinHandle<()>>,
}

impl FetchOutcome {
  fn new(response: Response, source: ResponseSource, strategy: Strategy) -> Self {
    Self {
      response,
      source,
      strategy,
      cache_write: None,
    }
  }

  fn with_cache_write(mut self, write: Option<JoinHandle<()>>) -> Self {
    self.cache_write = write;
    self
  }

  pub fn has_pending_write(&self) -> bool {
    self.cache_write.is_some()
  }

  /// Wait for the cache write, if one was issued, and return the response.
  pub async fn settle(self) -> Response {
    if let Some(write) = self.cache_write {
      if let Err(e) = write.await {
        warn!("Cache write task failed: {}", e);
      }
    }
    self.response
  }
}

/// The JSON envelope returned in place of an unreachable API read.
pub fn offline_envelope() -> Response {
  let body = serde_json::json!({
    "error": "Network unavailable",
    "offline": true,
  });
  Response::new(503, body.to_string()).with_header("Content-Type", "application/json")
}

/// Last resort when even the offline page is missing from the shell cache.
fn bare_offline_page() -> Response {
  Response::new(
    503,
    "<!DOCTYPE html><html><head><title>Offline</title></head>\
     <body><p>The library system is offline.</p></body></html>",
  )
  .with_header("Content-Type", "text/html; charset=utf-8")
}

pub struct StrategyEngine<F: Fetcher, S: CacheStorage> {
  cache: CacheStoreManager<S>,
  fetcher: Arc<F>,
  policy: RoutePolicy,
  allow_list: ApiAllowList,
  offline_page: RequestKey,
}

impl<F: Fetcher, S: CacheStorage + 'static> StrategyEngine<F, S> {
  pub fn new(config: &Config, cache: CacheStoreManager<S>, fetcher: Arc<F>) -> Result<Self> {
    let offline_page = Request::get(config.offline_page_url()?).key();

    Ok(Self {
      cache,
      fetcher,
      policy: RoutePolicy::new(config.origin.origin(), config.api.prefix.clone()),
      allow_list: ApiAllowList::new(&config.api.cacheable)?,
      offline_page,
    })
  }

  /// Satisfy an intercepted request, or `None` if it is not intercepted.
  pub async fn handle(&self, request: &Request) -> Option<FetchOutcome> {
    let strategy = self.policy.choose(request);
    debug!(method = %request.method, url = %request.url, %strategy, "Routing request");

    let outcome = match strategy {
      Strategy::Passthrough => return None,
      Strategy::NetworkWithOfflinePage => self.network_with_offline_page(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    };

    Some(outcome)
  }

  /// Cache lookup where a broken store reads as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<Response> {
    match self.cache.match_key(key) {
      Ok(hit) => hit.map(|h| h.response),
      Err(e) => {
        warn!(key = %key, "Cache lookup failed: {}", e);
        None
      }
    }
  }

  /// The offline page lives in the shell cache only.
  fn offline_page(&self) -> Response {
    let static_name = &self.cache.names().static_name;
    match self.cache.match_in(static_name, &self.offline_page) {
      Ok(Some(hit)) => hit.response,
      Ok(None) => {
        warn!("Offline page missing from cache");
        bare_offline_page()
      }
      Err(e) => {
        warn!(cache = %static_name, "Offline page lookup failed: {}", e);
        bare_offline_page()
      }
    }
  }

  fn store(&self, request: &Request, response: &Response) -> JoinHandle<()> {
    self.cache.put_in_background(
      &self.cache.names().runtime_name,
      request.key(),
      response.clone(),
    )
  }

  async fn network_with_offline_page(&self, request: &Request) -> FetchOutcome {
    let strategy = Strategy::NetworkWithOfflinePage;

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let write = (request.is_read() && is_cacheable(&response))
          .then(|| self.store(request, &response));
        FetchOutcome::new(response, ResponseSource::Network, strategy).with_cache_write(write)
      }
      Err(e) => {
        debug!(url = %request.url, "Navigation failed, falling back to cache: {}", e);

        if let Some(cached) = self.lookup(&request.key()) {
          return FetchOutcome::new(cached, ResponseSource::Cache, strategy);
        }

        FetchOutcome::new(self.offline_page(), ResponseSource::OfflinePage, strategy)
      }
    }
  }

  async fn network_first(&self, request: &Request) -> FetchOutcome {
    let strategy = Strategy::NetworkFirst;

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let write = (request.is_read()
          && is_cacheable(&response)
          && self.allow_list.matches(&request.url))
        .then(|| self.store(request, &response));
        FetchOutcome::new(response, ResponseSource::Network, strategy).with_cache_write(write)
      }
      Err(e) => {
        debug!(url = %request.url, "API request failed, falling back to cache: {}", e);

        match self.lookup(&request.key()) {
          Some(cached) => FetchOutcome::new(cached, ResponseSource::Cache, strategy),
          None => FetchOutcome::new(
            offline_envelope(),
            ResponseSource::OfflineEnvelope,
            strategy,
          ),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> FetchOutcome {
    let strategy = Strategy::CacheFirst;

    if let Some(cached) = self.lookup(&request.key()) {
      return FetchOutcome::new(cached, ResponseSource::Cache, strategy);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let write = (request.is_read() && is_cacheable_asset(&response))
          .then(|| self.store(request, &response));
        FetchOutcome::new(response, ResponseSource::Network, strategy).with_cache_write(write)
      }
      Err(e) => {
        warn!(url = %request.url, "Asset unavailable offline: {}", e);
        FetchOutcome::new(Response::error(), ResponseSource::NetworkError, strategy)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheNames, CachedResponse};
  use crate::db::Database;
  use crate::net::{RequestMode, ResponseType};
  use crate::test_support::{origin_url, test_config, FakeFetcher};
  use color_eyre::eyre::eyre;
  use url::Url;

  struct Harness {
    engine: StrategyEngine<FakeFetcher, Database>,
    fetcher: Arc<FakeFetcher>,
    cache: CacheStoreManager<Database>,
  }

  fn harness() -> Harness {
    let config = test_config();
    let names = CacheNames::new(&config.caches, &config.version);
    let cache = CacheStoreManager::new(Arc::new(Database::open_in_memory().unwrap()), names);
    let fetcher = Arc::new(FakeFetcher::new());
    let engine = StrategyEngine::new(&config, cache.clone(), Arc::clone(&fetcher)).unwrap();
    Harness {
      engine,
      fetcher,
      cache,
    }
  }

  fn runtime(h: &Harness) -> String {
    h.cache.names().runtime_name.clone()
  }

  fn stored(h: &Harness, request: &Request) -> bool {
    h.cache.match_key(&request.key()).unwrap().is_some()
  }

  #[tokio::test]
  async fn test_cross_origin_is_not_intercepted() {
    let h = harness();
    let request = Request::get(Url::parse("https://fonts.test/inter.woff2").unwrap());
    h.cache
      .put(&runtime(&h), &request.key(), &Response::new(200, "font"))
      .unwrap();

    assert!(h.engine.handle(&request).await.is_none());
    assert_eq!(h.fetcher.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_cross_origin_never_populates_cache() {
    let h = harness();
    let request = Request::navigate(Url::parse("https://catalog.partner.test/").unwrap());
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "partner"));

    assert!(h.engine.handle(&request).await.is_none());
    assert!(h.cache.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let h = harness();
    let request = Request::get(origin_url("/static/js/main.js"));
    h.cache
      .put(&runtime(&h), &request.key(), &Response::new(200, "cached js"))
      .unwrap();
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "fresh js"));

    let outcome = h.engine.handle(&request).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.text(), "cached js");
    assert_eq!(h.fetcher.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let h = harness();
    let request = Request::get(origin_url("/static/css/main.css"));
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "body{}"));

    let first = h.engine.handle(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert!(first.has_pending_write());
    first.settle().await;

    let second = h.engine.handle(&request).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text(), "body{}");
    assert_eq!(h.fetcher.calls_to(request.url.as_str()), 1);
  }

  #[tokio::test]
  async fn test_cache_first_skips_non_basic_responses() {
    let h = harness();
    let request = Request::get(origin_url("/logo.png"));
    h.fetcher.respond(
      request.url.as_str(),
      Response::new(200, "png").with_type(ResponseType::Cors),
    );

    let outcome = h.engine.handle(&request).await.unwrap();
    assert!(!outcome.has_pending_write());
    outcome.settle().await;
    assert!(!stored(&h, &request));
  }

  #[tokio::test]
  async fn test_cache_first_offline_miss_is_network_error() {
    let h = harness();
    let request = Request::get(origin_url("/static/js/chunk.js"));

    let outcome = h.engine.handle(&request).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::NetworkError);
    assert_eq!(outcome.response.response_type, ResponseType::Error);
    assert!(h.cache.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_caches_allow_listed_reads() {
    let h = harness();
    let request = Request::get(origin_url("/api/books?page=1"));
    h.fetcher.respond(
      request.url.as_str(),
      Response::new(200, "[]").with_header("Content-Type", "application/json"),
    );

    let outcome = h.engine.handle(&request).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    let response = outcome.settle().await;

    assert_eq!(response.text(), "[]");
    assert!(stored(&h, &request));
  }

  #[tokio::test]
  async fn test_network_first_skips_unlisted_endpoints() {
    let h = harness();
    let request = Request::get(origin_url("/api/members/7/fees"));
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "{}"));

    let outcome = h.engine.handle(&request).await.unwrap();
    assert!(!outcome.has_pending_write());
    assert_eq!(outcome.settle().await.status, 200);
    assert!(!stored(&h, &request));
  }

  #[tokio::test]
  async fn test_network_first_never_caches_writes() {
    let h = harness();
    let request = Request::new("POST", origin_url("/api/books")).with_body("{}");
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "{}"));

    let outcome = h.engine.handle(&request).await.unwrap();
    assert!(!outcome.has_pending_write());
    assert!(h.cache.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_returns_server_errors_uncached() {
    let h = harness();
    let request = Request::get(origin_url("/api/books"));
    h.fetcher
      .respond(request.url.as_str(), Response::new(500, "boom"));

    let outcome = h.engine.handle(&request).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(outcome.response.status, 500);
    assert!(!outcome.has_pending_write());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let h = harness();
    let request = Request::get(origin_url("/api/books"));
    h.cache
      .put(&runtime(&h), &request.key(), &Response::new(200, "cached books"))
      .unwrap();
    h.fetcher.go_offline();

    let outcome = h.engine.handle(&request).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.text(), "cached books");
  }

  #[tokio::test]
  async fn test_network_first_offline_envelope() {
    let h = harness();
    h.fetcher.go_offline();

    let outcome = h
      .engine
      .handle(&Request::get(origin_url("/api/circulation/overdue")))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::OfflineEnvelope);
    assert_eq!(outcome.response.status, 503);
    assert_eq!(outcome.response.content_type(), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&outcome.response.body).unwrap();
    assert_eq!(
      body,
      serde_json::json!({"error": "Network unavailable", "offline": true})
    );
  }

  #[tokio::test]
  async fn test_navigation_caches_fresh_page() {
    let h = harness();
    let request = Request::navigate(origin_url("/circulation"));
    h.fetcher
      .respond(request.url.as_str(), Response::new(200, "<html>circ</html>"));

    let outcome = h.engine.handle(&request).await.unwrap();
    assert_eq!(outcome.strategy, Strategy::NetworkWithOfflinePage);
    outcome.settle().await;

    let hit = h
      .cache
      .match_in(&runtime(&h), &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.text(), "<html>circ</html>");
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_page() {
    let h = harness();
    let request = Request::navigate(origin_url("/inventory"));
    h.cache
      .put(&runtime(&h), &request.key(), &Response::new(200, "old inventory"))
      .unwrap();
    h.fetcher.go_offline();

    let outcome = h.engine.handle(&request).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.text(), "old inventory");
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_offline_page() {
    let h = harness();
    let offline = Request::get(origin_url("/offline.html"));
    h.cache
      .put(
        &h.cache.names().static_name.clone(),
        &offline.key(),
        &Response::new(200, "offline page"),
      )
      .unwrap();
    h.fetcher.go_offline();

    let outcome = h
      .engine
      .handle(&Request::navigate(origin_url("/reports/daily")))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::OfflinePage);
    assert_eq!(outcome.response.text(), "offline page");
  }

  #[tokio::test]
  async fn test_offline_page_comes_from_shell_cache_only() {
    let h = harness();
    let offline = Request::get(origin_url("/offline.html"));
    h.cache
      .put(&runtime(&h), &offline.key(), &Response::new(200, "stray copy"))
      .unwrap();
    h.fetcher.go_offline();

    let outcome = h
      .engine
      .handle(&Request::navigate(origin_url("/patrons")))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::OfflinePage);
    assert_eq!(outcome.response.status, 503);
    assert!(!outcome.response.text().contains("stray copy"));
  }

  #[tokio::test]
  async fn test_navigation_without_offline_page_still_renders() {
    let h = harness();
    h.fetcher.go_offline();

    let outcome = h
      .engine
      .handle(&Request::navigate(origin_url("/acquisitions")))
      .await
      .unwrap();

    assert_eq!(outcome.source, ResponseSource::OfflinePage);
    assert_eq!(outcome.response.status, 503);
    assert!(outcome.response.text().contains("offline"));
  }

  #[tokio::test]
  async fn test_failures_are_never_cached() {
    let statuses = [201, 204, 301, 404, 500, 503];
    let methods = ["GET", "POST"];
    let paths = ["/", "/api/books", "/static/js/app.js"];

    for status in statuses {
      for method in methods {
        for path in paths {
          for navigate in [true, false] {
            let h = harness();
            let mut request = Request::new(method, origin_url(path));
            if navigate {
              request = request.with_mode(RequestMode::Navigate);
            }
            h.fetcher
              .respond(request.url.as_str(), Response::new(status, "x"));

            let outcome = h.engine.handle(&request).await.unwrap();
            assert!(!outcome.has_pending_write(), "{} {} {}", method, path, status);
            outcome.settle().await;
            assert!(h.cache.cache_names().unwrap().is_empty());
          }
        }
      }
    }

    let h = harness();
    let request = Request::get(origin_url("/api/books"));
    h.fetcher.respond(request.url.as_str(), Response::error());
    let outcome = h.engine.handle(&request).await.unwrap();
    assert!(!outcome.has_pending_write());
  }

  /// Storage that fails every operation.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn open_cache(&self, _name: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn has_cache(&self, _name: &str) -> Result<bool> {
      Err(eyre!("quota exceeded"))
    }
    fn cache_names(&self) -> Result<Vec<String>> {
      Err(eyre!("quota exceeded"))
    }
    fn delete_cache(&self, _name: &str) -> Result<bool> {
      Err(eyre!("quota exceeded"))
    }
    fn put_entry(&self, _name: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn put_entries(&self, _name: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn get_entry(&self, _name: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
      Err(eyre!("quota exceeded"))
    }
    fn entry_keys(&self, _name: &str) -> Result<Vec<String>> {
      Err(eyre!("quota exceeded"))
    }
  }

  #[tokio::test]
  async fn test_broken_storage_degrades_silently() {
    let config = test_config();
    let names = CacheNames::new(&config.caches, &config.version);
    let cache = CacheStoreManager::new(Arc::new(BrokenStorage), names);
    let fetcher = Arc::new(FakeFetcher::new());
    let engine = StrategyEngine::new(&config, cache, Arc::clone(&fetcher)).unwrap();

    let books = Request::get(origin_url("/api/books"));
    fetcher.respond(books.url.as_str(), Response::new(200, "books"));
    let response = engine.handle(&books).await.unwrap().settle().await;
    assert_eq!(response.text(), "books");

    let asset = Request::get(origin_url("/app.js"));
    fetcher.respond(asset.url.as_str(), Response::new(200, "js"));
    let outcome = engine.handle(&asset).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);

    fetcher.go_offline();
    let outcome = engine.handle(&books).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::OfflineEnvelope);
  }
}
