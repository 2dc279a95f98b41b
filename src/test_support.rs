//! Scripted network, notification sink and config shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::net::{Fetcher, Request, Response};
use crate::notify::{Notification, NotificationSink};

pub const ORIGIN: &str = "https://library.test";

pub fn origin_url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn test_config() -> Config {
  let mut config = Config::for_origin(Url::parse(ORIGIN).unwrap());
  config.version = "v1".to_string();
  config
}

#[derive(Clone)]
enum Route {
  Respond(Response, Option<Duration>),
  Fail,
}

/// Network double: per-URL canned responses, everything else unreachable.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Route>>,
  requests: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Respond(response, None));
  }

  pub fn respond_after(&self, url: &str, delay: Duration, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Respond(response, Some(delay)));
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
  }

  /// Every fetch fails until `go_online` is called.
  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn go_online(&self) {
    self.offline.store(false, Ordering::SeqCst);
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    match route {
      Some(Route::Respond(response, delay)) => {
        if let Some(delay) = delay {
          tokio::time::sleep(delay).await;
        }
        Ok(response)
      }
      Some(Route::Fail) | None => Err(eyre!("network unreachable: {}", request.url)),
    }
  }
}

/// Notification sink that remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingNotifier {
  pub shown: Mutex<Vec<Notification>>,
  pub closed: Mutex<Vec<Notification>>,
}

impl NotificationSink for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn close(&self, notification: &Notification) -> Result<()> {
    self.closed.lock().unwrap().push(notification.clone());
    Ok(())
  }
}
