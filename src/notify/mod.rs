//! Push notifications and what happens when the user interacts with them.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A system notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub actions: Vec<NotificationAction>,
  /// Opened by the primary action
  pub target_url: Url,
}

/// Host surface that actually displays notifications.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
  fn close(&self, notification: &Notification) -> Result<()>;
}

/// Sink that writes notifications to the log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "Notification shown");
    Ok(())
  }

  fn close(&self, notification: &Notification) -> Result<()> {
    debug!(title = %notification.title, "Notification closed");
    Ok(())
  }
}

pub struct NotificationBridge {
  title: String,
  default_body: String,
  icon: Option<String>,
  badge: Option<String>,
  actions: Vec<NotificationAction>,
  primary_action: String,
  target_url: Url,
  sink: Arc<dyn NotificationSink>,
}

impl NotificationBridge {
  pub fn new(config: &Config, sink: Arc<dyn NotificationSink>) -> Result<Self> {
    let settings = &config.notifications;

    Ok(Self {
      title: settings.title.clone(),
      default_body: settings.default_body.clone(),
      icon: settings.icon.clone(),
      badge: settings.badge.clone(),
      actions: settings
        .actions
        .iter()
        .map(|a| NotificationAction {
          action: a.action.clone(),
          title: a.title.clone(),
        })
        .collect(),
      primary_action: settings.primary_action.clone(),
      target_url: config.resolve(&settings.target_url)?,
      sink,
    })
  }

  /// Build the notification for a push payload without displaying it.
  pub fn compose(&self, payload: Option<&str>) -> Notification {
    let body = payload
      .map(str::trim)
      .filter(|p| !p.is_empty())
      .unwrap_or(self.default_body.as_str());

    Notification {
      title: self.title.clone(),
      body: body.to_string(),
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      actions: self.actions.clone(),
      target_url: self.target_url.clone(),
    }
  }

  /// Show a notification for a push event.
  pub fn on_push(&self, payload: Option<&str>) -> Notification {
    let notification = self.compose(payload);
    if let Err(e) = self.sink.show(&notification) {
      error!("Failed to show notification: {}", e);
    }
    notification
  }

  /// Close the notification; returns the URL to open if the primary action
  /// was chosen.
  pub fn on_click(&self, notification: &Notification, action: Option<&str>) -> Option<Url> {
    if let Err(e) = self.sink.close(notification) {
      error!("Failed to close notification: {}", e);
    }

    match action {
      Some(action) if action == self.primary_action => Some(notification.target_url.clone()),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{origin_url, test_config, RecordingNotifier};

  fn bridge() -> (NotificationBridge, Arc<RecordingNotifier>) {
    let sink = Arc::new(RecordingNotifier::default());
    let bridge = NotificationBridge::new(&test_config(), sink.clone()).unwrap();
    (bridge, sink)
  }

  #[test]
  fn test_push_with_payload() {
    let (bridge, sink) = bridge();
    let n = bridge.on_push(Some("'Dune' is ready for pickup"));

    assert_eq!(n.title, "Library Management System");
    assert_eq!(n.body, "'Dune' is ready for pickup");
    assert_eq!(
      n.actions.iter().map(|a| a.action.as_str()).collect::<Vec<_>>(),
      vec!["view", "dismiss"]
    );
    assert_eq!(sink.shown.lock().unwrap().as_slice(), &[n]);
  }

  #[test]
  fn test_push_without_payload_uses_default_body() {
    let (bridge, sink) = bridge();
    assert_eq!(
      bridge.on_push(None).body,
      "You have a new library notification"
    );
    assert_eq!(
      bridge.on_push(Some("   ")).body,
      "You have a new library notification"
    );
    assert_eq!(sink.shown.lock().unwrap().len(), 2);
  }

  #[test]
  fn test_primary_action_opens_target() {
    let (bridge, sink) = bridge();
    let n = bridge.compose(None);

    assert_eq!(bridge.on_click(&n, Some("view")), Some(origin_url("/")));
    assert_eq!(sink.closed.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_other_interactions_only_close() {
    let (bridge, sink) = bridge();
    let n = bridge.compose(Some("Fine overdue"));

    assert_eq!(bridge.on_click(&n, Some("dismiss")), None);
    assert_eq!(bridge.on_click(&n, None), None);
    assert_eq!(sink.closed.lock().unwrap().len(), 2);
  }
}
