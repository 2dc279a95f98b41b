//! Pure routing decisions: which strategy handles a request, and which
//! responses may ever be written to a cache.

use std::fmt;
use url::Origin;

use crate::net::{Request, Response, ResponseType};

/// How an intercepted request is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  /// Network first, then the cached page, then the offline page
  NetworkWithOfflinePage,
  /// Network first, then cache, then the offline JSON envelope
  NetworkFirst,
  /// Cache first, network on miss
  CacheFirst,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Strategy::Passthrough => write!(f, "passthrough"),
      Strategy::NetworkWithOfflinePage => write!(f, "network-with-offline-page"),
      Strategy::NetworkFirst => write!(f, "network-first"),
      Strategy::CacheFirst => write!(f, "cache-first"),
    }
  }
}

/// Routing rules for one origin.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  origin: Origin,
  api_prefix: String,
}

impl RoutePolicy {
  pub fn new(origin: Origin, api_prefix: impl Into<String>) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.into(),
    }
  }

  /// First match wins: cross-origin, navigation, API prefix, everything else.
  pub fn choose(&self, request: &Request) -> Strategy {
    if !request.is_same_origin(&self.origin) {
      Strategy::Passthrough
    } else if request.is_navigation() {
      Strategy::NetworkWithOfflinePage
    } else if request.url.path().starts_with(&self.api_prefix) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }
}

/// A response may be cached only if it is a 200 that is neither a network
/// error nor opaque. Applies to every strategy.
pub fn is_cacheable(response: &Response) -> bool {
  response.status == 200
    && !matches!(
      response.response_type,
      ResponseType::Error | ResponseType::Opaque
    )
}

/// Cache-first additionally refuses anything that did not come from the origin.
pub fn is_cacheable_asset(response: &Response) -> bool {
  is_cacheable(response) && response.response_type == ResponseType::Basic
}
