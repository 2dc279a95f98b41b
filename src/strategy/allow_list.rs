use color_eyre::{eyre::eyre, Result};
use regex::RegexSet;
use url::Url;

/// Read endpoints whose responses may be cached by network-first.
#[derive(Debug, Clone)]
pub struct ApiAllowList {
  patterns: RegexSet,
}

impl ApiAllowList {
  pub fn new<I, S>(patterns: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let patterns =
      RegexSet::new(patterns).map_err(|e| eyre!("Invalid API cache pattern: {}", e))?;
    Ok(Self { patterns })
  }

  /// Patterns are matched against `path` or `path?query`.
  pub fn matches(&self, url: &Url) -> bool {
    match url.query() {
      Some(query) => self.patterns.is_match(&format!("{}?{}", url.path(), query)),
      None => self.patterns.is_match(url.path()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::test_support::origin_url;

  #[test]
  fn test_default_patterns() {
    let list = ApiAllowList::new(&ApiConfig::default().cacheable).unwrap();
    assert!(list.matches(&origin_url("/api/books")));
    assert!(list.matches(&origin_url("/api/books/42")));
    assert!(list.matches(&origin_url("/api/books?page=2")));
    assert!(list.matches(&origin_url("/api/categories")));
    assert!(!list.matches(&origin_url("/api/bookshelves")));
    assert!(!list.matches(&origin_url("/api/checkouts")));
    assert!(!list.matches(&origin_url("/api/fees/12")));
  }

  #[test]
  fn test_query_is_visible_to_patterns() {
    let list = ApiAllowList::new([r"^/api/reports\?type=daily"]).unwrap();
    assert!(list.matches(&origin_url("/api/reports?type=daily")));
    assert!(!list.matches(&origin_url("/api/reports?type=audit")));
  }

  #[test]
  fn test_empty_list_matches_nothing() {
    let list = ApiAllowList::new(Vec::<String>::new()).unwrap();
    assert!(!list.matches(&origin_url("/api/books")));
  }

  #[test]
  fn test_invalid_pattern() {
    assert!(ApiAllowList::new(["(open"]).is_err());
  }
}
