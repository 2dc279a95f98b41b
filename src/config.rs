use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "libsys-worker";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the application the worker serves
  pub origin: Url,
  /// Version tag baked into cache names; bumping it rolls every cache over
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default)]
  pub caches: CacheConfig,
  /// Application shell fetched at install time
  #[serde(default = "default_shell")]
  pub shell: Vec<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Leave the waiting phase as soon as install completes
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  #[serde(default)]
  pub network: NetworkConfig,
  pub data_dir: Option<PathBuf>,
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub static_template: String,
  pub runtime_template: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_template: "library-static-{version}".to_string(),
      runtime_template: "library-runtime-{version}".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Path prefix routed through network-first
  pub prefix: String,
  /// Regular expressions matched against `path[?query]` of GET endpoints
  /// whose responses may be cached
  pub cacheable: Vec<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      prefix: "/api/".to_string(),
      cacheable: vec![
        r"^/api/books(/|\?|$)".to_string(),
        r"^/api/authors(/|\?|$)".to_string(),
        r"^/api/categories(/|\?|$)".to_string(),
        r"^/api/branches(/|\?|$)".to_string(),
        r"^/api/search(/|\?|$)".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync tag -> pending-request queue name
  pub queues: BTreeMap<String, String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    let queues = [
      ("sync-checkouts", "checkout-submissions"),
      ("sync-payments", "payment-submissions"),
    ]
    .into_iter()
    .map(|(tag, queue)| (tag.to_string(), queue.to_string()))
    .collect();

    Self { queues }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionConfig {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub default_body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  /// Page opened by the primary action
  pub target_url: String,
  pub actions: Vec<ActionConfig>,
  pub primary_action: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Library Management System".to_string(),
      default_body: "You have a new library notification".to_string(),
      icon: Some("/logo192.png".to_string()),
      badge: Some("/logo192.png".to_string()),
      target_url: "/".to_string(),
      actions: vec![
        ActionConfig {
          action: "view".to_string(),
          title: "View".to_string(),
        },
        ActionConfig {
          action: "dismiss".to_string(),
          title: "Dismiss".to_string(),
        },
      ],
      primary_action: "view".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

fn default_version() -> String {
  format!("v{}", env!("CARGO_PKG_VERSION"))
}

fn default_shell() -> Vec<String> {
  ["/", "/index.html", "/manifest.json", "/offline.html"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Configuration with every default applied for the given origin.
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      version: default_version(),
      caches: CacheConfig::default(),
      shell: default_shell(),
      offline_page: default_offline_page(),
      api: ApiConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      skip_waiting: true,
      network: NetworkConfig::default(),
      data_dir: None,
      log_dir: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./libsys-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/libsys-worker/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::discover(explicit_path)?.ok_or_else(|| {
      eyre!(
        "No configuration file found. Create one at ~/.config/libsys-worker/config.yaml \
         or pass --origin."
      )
    })
  }

  /// Like `load`, but finding no file in the default locations is not an error.
  pub fn discover(explicit_path: Option<&Path>) -> Result<Option<Self>> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    path.map(|p| Self::load_from_path(&p)).transpose()
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("libsys-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Reject configurations that would break cache rollover, routing or sync.
  pub fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
      return Err(eyre!("origin must be an http(s) URL, got {}", self.origin));
    }
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }

    let templates = [&self.caches.static_template, &self.caches.runtime_template];
    for template in templates {
      if !template.contains("{version}") {
        return Err(eyre!(
          "cache template '{}' must contain {{version}}",
          template
        ));
      }
    }
    if self.caches.static_template == self.caches.runtime_template {
      return Err(eyre!("static and runtime cache templates must differ"));
    }

    if self.shell.is_empty() {
      return Err(eyre!("shell manifest must list at least one resource"));
    }
    for path in self.shell.iter().chain([&self.offline_page]) {
      let url = self.resolve(path)?;
      if url.origin() != self.origin.origin() {
        return Err(eyre!("shell resource {} is not same-origin", path));
      }
    }

    if !self.api.prefix.starts_with('/') {
      return Err(eyre!("api.prefix must start with '/', got '{}'", self.api.prefix));
    }
    for pattern in &self.api.cacheable {
      Regex::new(pattern).map_err(|e| eyre!("Invalid api.cacheable pattern '{}': {}", pattern, e))?;
    }

    let mut queues = BTreeSet::new();
    for (tag, queue) in &self.sync.queues {
      if tag.is_empty() || queue.is_empty() {
        return Err(eyre!("sync tags and queue names must not be empty"));
      }
      if !queues.insert(queue) {
        return Err(eyre!("queue '{}' is mapped from more than one sync tag", queue));
      }
    }

    let notifications = &self.notifications;
    if !notifications
      .actions
      .iter()
      .any(|a| a.action == notifications.primary_action)
    {
      return Err(eyre!(
        "notifications.primary_action '{}' is not one of the configured actions",
        notifications.primary_action
      ));
    }
    self.resolve(&notifications.target_url)?;

    Ok(())
  }

  /// Resolve a same-origin path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  pub fn shell_urls(&self) -> Result<Vec<Url>> {
    self.shell.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn offline_page_url(&self) -> Result<Url> {
    self.resolve(&self.offline_page)
  }

  fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("worker.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(self.data_dir()?.join("logs")),
    }
  }
}
