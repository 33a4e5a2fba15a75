//! Process-wide registry of named caches

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::path::DEFAULT_DELIMITER;
use crate::timer::Timer;

/// Name of the cache that always exists and never expires
pub const DEFAULT_NAME: &str = "default";

type CacheMap = HashMap<String, Arc<Cache>>;

/// Shared name → cache mapping. Cloning is cheap.
#[derive(Clone)]
pub struct Registry {
  caches: Arc<RwLock<CacheMap>>,
  delimiter: Arc<str>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::new(DEFAULT_DELIMITER)
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("caches", &self.list())
      .field("delimiter", &self.delimiter)
      .finish()
  }
}

impl Registry {
  /// Create a registry holding an empty `default` cache
  pub fn new(delimiter: &str) -> Self {
    let mut caches = HashMap::new();
    caches.insert(DEFAULT_NAME.to_string(), Cache::new(DEFAULT_NAME, delimiter));
    Self {
      caches: Arc::new(RwLock::new(caches)),
      delimiter: Arc::from(delimiter),
    }
  }

  pub fn delimiter(&self) -> &str {
    &self.delimiter
  }

  pub fn add_cache(&self, name: &str) -> Result<Arc<Cache>> {
    if name.is_empty() {
      return Err(CacheError::InvalidKey(name.to_string()));
    }
    let mut caches = self.caches.write();
    if caches.contains_key(name) {
      return Err(CacheError::CacheAlreadyExists(name.to_string()));
    }
    let cache = Cache::new(name, &self.delimiter);
    caches.insert(name.to_string(), cache.clone());
    tracing::info!(cache = name, "Cache created");
    Ok(cache)
  }

  /// Look up a cache without acquiring it
  pub fn fetch_cache(&self, name: &str) -> Result<Arc<Cache>> {
    self
      .caches
      .read()
      .get(name)
      .cloned()
      .ok_or_else(|| CacheError::CacheNotFound(name.to_string()))
  }

  /// Fetch `name`, creating it when missing
  pub fn get_or_create(&self, name: &str) -> Arc<Cache> {
    if let Some(cache) = self.caches.read().get(name) {
      return cache.clone();
    }
    self
      .caches
      .write()
      .entry(name.to_string())
      .or_insert_with(|| Cache::new(name, &self.delimiter))
      .clone()
  }

  pub fn exists(&self, name: &str) -> bool {
    self.caches.read().contains_key(name)
  }

  /// Remove a cache and stop all of its timers
  pub fn delete_cache(&self, name: &str) -> Result<()> {
    if name == DEFAULT_NAME {
      return Err(CacheError::Forbidden(
        "the default cache cannot be deleted".to_string(),
      ));
    }
    let removed = self.caches.write().remove(name);
    match removed {
      Some(cache) => {
        cache.close();
        tracing::info!(cache = name, "Cache deleted");
        Ok(())
      }
      None => Err(CacheError::CacheNotFound(name.to_string())),
    }
  }

  /// Cache names in sorted order
  pub fn list(&self) -> Vec<String> {
    let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
    names.sort();
    names
  }

  /// Every cache, sorted by name
  pub fn caches(&self) -> Vec<Arc<Cache>> {
    let mut caches: Vec<Arc<Cache>> = self.caches.read().values().cloned().collect();
    caches.sort_by(|a, b| a.name().cmp(b.name()));
    caches
  }

  /// Remove the cache `millis` milliseconds from now
  pub fn set_cache_ttl(&self, name: &str, millis: i64) -> Result<()> {
    if name == DEFAULT_NAME {
      return Err(CacheError::Forbidden(
        "cannot set an expiration on the default cache".to_string(),
      ));
    }
    // Holding the read lock keeps an immediate expiry from running
    // before the timer is installed.
    let caches = self.caches.read();
    let cache = caches
      .get(name)
      .ok_or_else(|| CacheError::CacheNotFound(name.to_string()))?;

    let weak = Arc::downgrade(&self.caches);
    let owned = name.to_string();
    let timer = Timer::schedule(millis, move |id| expire_cache(&weak, &owned, id))?;
    cache.set_expiration(timer);
    tracing::debug!(cache = name, ttl_ms = millis, "Cache TTL set");
    Ok(())
  }

  pub fn cancel_cache_ttl(&self, name: &str) -> Result<()> {
    self.fetch_cache(name)?.cancel_expiration();
    Ok(())
  }

  /// Install `cache` under its name, closing whatever it replaces
  pub(crate) fn install(&self, cache: Arc<Cache>) {
    let previous = self
      .caches
      .write()
      .insert(cache.name().to_string(), cache);
    if let Some(previous) = previous {
      previous.close();
    }
  }

  /// Stop the timers of every cache
  pub fn close_all(&self) {
    for cache in self.caches() {
      cache.close();
    }
  }
}

fn expire_cache(caches: &Weak<RwLock<CacheMap>>, name: &str, timer_id: u64) {
  let Some(caches) = caches.upgrade() else {
    return;
  };
  let removed = {
    let mut caches = caches.write();
    let current = caches.get(name).and_then(|c| c.expiration_id());
    if current != Some(timer_id) {
      return;
    }
    caches.remove(name)
  };
  if let Some(cache) = removed {
    cache.close();
    tracing::info!(cache = name, "Cache expired");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use std::time::Duration;

  #[test]
  fn test_default_cache_exists() {
    let registry = Registry::default();
    assert!(registry.exists(DEFAULT_NAME));
    assert_eq!(registry.list(), vec![DEFAULT_NAME.to_string()]);
    assert_eq!(registry.delimiter(), "/");
  }

  #[test]
  fn test_add_fetch_delete() {
    let registry = Registry::default();
    registry.add_cache("b").unwrap();
    registry.add_cache("a").unwrap();
    assert_eq!(registry.list(), vec!["a", "b", "default"]);
    assert_eq!(
      registry.add_cache("a").unwrap_err().kind(),
      ErrorKind::AlreadyExists
    );

    assert_eq!(registry.fetch_cache("a").unwrap().name(), "a");
    registry.delete_cache("a").unwrap();
    let err = registry.fetch_cache("a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "cache not found: a");
    assert!(registry.delete_cache("a").is_err());
  }

  #[test]
  fn test_default_cache_is_protected() {
    let registry = Registry::default();
    assert_eq!(
      registry.delete_cache(DEFAULT_NAME).unwrap_err().kind(),
      ErrorKind::Validation
    );
    assert_eq!(
      registry.set_cache_ttl(DEFAULT_NAME, 10).unwrap_err().kind(),
      ErrorKind::Validation
    );
  }

  #[test]
  fn test_get_or_create() {
    let registry = Registry::default();
    let a = registry.get_or_create("1");
    let b = registry.get_or_create("1");
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[tokio::test]
  async fn test_cache_ttl_removes_cache() {
    let registry = Registry::default();
    registry.add_cache("temp").unwrap();
    registry.set_cache_ttl("temp", 20).unwrap();
    assert!(registry.fetch_cache("temp").unwrap().ttl_millis().is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!registry.exists("temp"));
  }

  #[tokio::test]
  async fn test_cancel_cache_ttl() {
    let registry = Registry::default();
    registry.add_cache("temp").unwrap();
    registry.set_cache_ttl("temp", 30).unwrap();
    registry.cancel_cache_ttl("temp").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(registry.exists("temp"));
  }

  #[tokio::test]
  async fn test_replaced_cache_ttl_does_not_fire() {
    let registry = Registry::default();
    registry.add_cache("temp").unwrap();
    registry.set_cache_ttl("temp", 30).unwrap();
    registry.set_cache_ttl("temp", 60_000).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(registry.exists("temp"));
  }
}
