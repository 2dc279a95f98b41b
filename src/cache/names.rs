use crate::config::CacheConfig;

/// Names of the two caches that are current for one version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// Application shell, filled at install time
  pub static_name: String,
  /// Grows as strategies store responses
  pub runtime_name: String,
}

impl CacheNames {
  pub fn new(config: &CacheConfig, version: &str) -> Self {
    Self {
      static_name: config.static_template.replace("{version}", version),
      runtime_name: config.runtime_template.replace("{version}", version),
    }
  }

  pub fn current(&self) -> [&str; 2] {
    [&self.static_name, &self.runtime_name]
  }

  pub fn is_current(&self, name: &str) -> bool {
    self.current().contains(&name)
  }
}
