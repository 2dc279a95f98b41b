use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Origin;

use crate::config::Config;

use super::request::{Headers, Request, RequestMode, Response, ResponseType};

/// The network as seen from the worker.
///
/// An `Err` means the network could not be reached at all. HTTP error
/// statuses are ordinary responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Copy every header field, repeats included. Values that are not visible
/// ASCII are dropped.
fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
  map
    .iter()
    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
    .collect()
}

/// Fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .user_agent(concat!("libsys-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin.origin(),
    })
  }

  fn classify(&self, request: &Request, final_url: &url::Url) -> ResponseType {
    if final_url.origin() == self.origin {
      ResponseType::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseType::Opaque
    } else {
      ResponseType::Cors
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = resp.status();
    let final_url = resp.url().clone();
    let response_type = self.classify(request, &final_url);

    let headers = collect_headers(resp.headers());

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
      response_type,
      url: Some(final_url),
    })
  }
}
