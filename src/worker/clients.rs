use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// An open page of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: String,
  pub url: Url,
  /// Whether this worker intercepts the page's requests
  pub controlled: bool,
  pub focused: bool,
}

fn next_client_id() -> String {
  static COUNTER: AtomicU64 = AtomicU64::new(1);
  format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Pages known to the worker.
#[derive(Debug, Default)]
pub struct Clients {
  clients: HashMap<String, Client>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Track a newly opened page. A page opened while no worker is active
  /// stays uncontrolled until the next `claim`.
  pub fn add(&mut self, url: Url, controlled: bool) -> Client {
    let client = Client {
      id: next_client_id(),
      url,
      controlled,
      focused: false,
    };
    self.clients.insert(client.id.clone(), client.clone());
    client
  }

  pub fn get(&self, id: &str) -> Option<&Client> {
    self.clients.get(id)
  }

  pub fn is_controlled(&self, id: &str) -> bool {
    self.get(id).is_some_and(|c| c.controlled)
  }

  /// Take control of every known page. Returns how many changed hands.
  pub fn claim(&mut self) -> usize {
    let mut claimed = 0;
    for client in self.clients.values_mut().filter(|c| !c.controlled) {
      client.controlled = true;
      claimed += 1;
    }
    claimed
  }

  /// Focus a window already showing `url`, or open a new one.
  pub fn open_window(&mut self, url: Url) -> Client {
    for client in self.clients.values_mut() {
      client.focused = false;
    }

    if let Some(existing) = self.clients.values_mut().find(|c| c.url == url) {
      existing.focused = true;
      return existing.clone();
    }

    let client = Client {
      id: next_client_id(),
      url,
      controlled: true,
      focused: true,
    };
    self.clients.insert(client.id.clone(), client.clone());
    client
  }

  pub fn remove(&mut self, id: &str) -> Option<Client> {
    self.clients.remove(id)
  }

  pub fn len(&self) -> usize {
    self.clients.len()
  }
}
