//! Request and response snapshots passed between the page, the worker and the network.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::{Origin, Url};

/// Header fields in the order they were received.
///
/// Names are lowercased. A repeated name keeps every value, so `set-cookie`
/// and friends survive a trip through the cache or a pending-request queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, name: &str, value: &str) {
    self
      .0
      .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
  }

  /// First value of `name`.
  pub fn get(&self, name: &str) -> Option<&str> {
    self.get_all(name).next()
  }

  pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
    self
      .0
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

impl<N: AsRef<str>, V: AsRef<str>> FromIterator<(N, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
    let mut headers = Headers::new();
    for (name, value) in iter {
      headers.append(name.as_ref(), value.as_ref());
    }
    headers
  }
}

/// How the page issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Full-page load
  Navigate,
  #[default]
  SameOrigin,
  NoCors,
  Cors,
}

/// An HTTP request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  pub method: String,
  pub url: Url,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default)]
  pub body: Option<Vec<u8>>,
  #[serde(default)]
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Headers::new(),
      body: None,
      mode: RequestMode::default(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// A full-page navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_mode(RequestMode::Navigate)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.append(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Only GET requests are ever written to a named cache.
  pub fn is_read(&self) -> bool {
    self.method == "GET"
  }

  pub fn is_same_origin(&self, origin: &Origin) -> bool {
    self.url.origin() == *origin
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized request identity used as the key of a named cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
  hash: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let method = method.to_ascii_uppercase();
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { method, url, hash }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Classification of a response, mirroring what a browser exposes to a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response readable through CORS
  Cors,
  /// Cross-origin no-cors response; status and body are not trustworthy
  Opaque,
  /// Network error
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }
}

impl FromStr for ResponseType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "error" => Ok(Self::Error),
      other => Err(format!("unknown response type '{}'", other)),
    }
  }
}

/// A fully buffered response snapshot.
///
/// Bodies are buffered, so handing a copy to the cache is a plain `clone()`
/// and the caller's response stays intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// Final URL after redirects, when known
  pub url: Option<Url>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = reqwest::StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or("")
      .to_string();

    Self {
      status,
      status_text,
      headers: Headers::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      url: None,
    }
  }

  /// The response a browser hands back for a failed fetch.
  pub fn error() -> Self {
    Self {
      status: 0,
      status_text: String::new(),
      headers: Headers::new(),
      body: Vec::new(),
      response_type: ResponseType::Error,
      url: None,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.append(name, value);
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  /// True for any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type")
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_request_key_ignores_fragment() {
    let a = RequestKey::new("get", &url("https://library.test/books#top"));
    let b = RequestKey::new("GET", &url("https://library.test/books"));
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "GET https://library.test/books");
    assert_eq!(a.hash().len(), 64);
  }

  #[test]
  fn test_request_key_distinguishes_method_and_query() {
    let get = RequestKey::new("GET", &url("https://library.test/api/books?page=1"));
    let post = RequestKey::new("POST", &url("https://library.test/api/books?page=1"));
    let page2 = RequestKey::new("GET", &url("https://library.test/api/books?page=2"));
    assert_ne!(get.hash(), post.hash());
    assert_ne!(get.hash(), page2.hash());
  }

  #[test]
  fn test_request_builders() {
    let req = Request::new("post", url("https://library.test/api/checkouts"))
      .with_header("Content-Type", "application/json")
      .with_body(r#"{"copy":7}"#);
    assert_eq!(req.method, "POST");
    assert!(!req.is_read());
    assert_eq!(req.headers.get("content-type"), Some("application/json"));
    assert!(Request::navigate(url("https://library.test/")).is_navigation());
  }

  #[test]
  fn test_request_roundtrips_through_json() {
    let req = Request::new("POST", url("https://library.test/api/payments"))
      .with_header("X-Member", "42")
      .with_body("amount=3.50");
    let json = serde_json::to_string(&req).unwrap();
    let back: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(back, req);
  }

  #[test]
  fn test_repeated_headers_are_kept() {
    let req = Request::new("POST", url("https://library.test/api/payments"))
      .with_header("Accept", "application/json")
      .with_header("accept", "text/plain")
      .with_header("X-Member", "42");

    assert_eq!(req.headers.iter().count(), 3);
    assert_eq!(req.headers.get("ACCEPT"), Some("application/json"));
    assert_eq!(
      req.headers.get_all("accept").collect::<Vec<_>>(),
      vec!["application/json", "text/plain"]
    );

    let back: Request = serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
    assert_eq!(back.headers, req.headers);
  }

  #[test]
  fn test_same_origin() {
    let origin = url("https://library.test").origin();
    assert!(Request::get(url("https://library.test/a.js")).is_same_origin(&origin));
    assert!(!Request::get(url("https://cdn.test/a.js")).is_same_origin(&origin));
    assert!(!Request::get(url("http://library.test/a.js")).is_same_origin(&origin));
  }

  #[test]
  fn test_response_status_helpers() {
    let ok = Response::new(200, "hi").with_header("Content-Type", "text/plain");
    assert!(ok.is_ok());
    assert_eq!(ok.status_text, "OK");
    assert_eq!(ok.content_type(), Some("text/plain"));
    assert!(!Response::new(404, "").is_ok());

    let err = Response::error();
    assert_eq!(err.status, 0);
    assert_eq!(err.response_type, ResponseType::Error);
  }

  #[test]
  fn test_response_type_parse() {
    for t in [
      ResponseType::Basic,
      ResponseType::Cors,
      ResponseType::Opaque,
      ResponseType::Error,
    ] {
      assert_eq!(t.as_str().parse::<ResponseType>(), Ok(t));
    }
    assert!("weird".parse::<ResponseType>().is_err());
  }
}
