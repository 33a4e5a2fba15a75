//! Per-key expiration

use std::collections::BTreeMap;

use super::{Cache, CacheGuard};
use crate::error::Result;
use crate::timer::Timer;

impl CacheGuard<'_> {
  /// Expire `key` after `millis` milliseconds, replacing any earlier TTL
  pub fn set_key_ttl(&mut self, key: &str, millis: i64) -> Result<()> {
    let weak = self.cache.this.clone();
    let owned = key.to_string();
    let timer = Timer::schedule(millis, move |id| {
      let Some(cache) = weak.upgrade() else {
        return;
      };
      Cache::fire_key_ttl(&cache, &owned, id);
    })?;

    tracing::debug!(cache = %self.cache.name, key, ttl_ms = millis, "Key TTL set");
    if let Some(old) = self.state.key_exps.insert(key.to_string(), timer) {
      old.stop();
    }
    Ok(())
  }

  /// Drop any TTL on `key`
  pub fn cancel_key_ttl(&mut self, key: &str) -> Result<()> {
    if let Some(timer) = self.state.key_exps.remove(key) {
      timer.stop();
    }
    Ok(())
  }

  /// Unix milliseconds at which `key` expires
  pub fn key_expiration_millis(&self, key: &str) -> Option<i64> {
    self.state.key_exps.get(key).map(Timer::expiration_millis)
  }

  /// Milliseconds left before `key` expires
  pub fn key_ttl_millis(&self, key: &str) -> Option<i64> {
    self.state.key_exps.get(key).map(Timer::remaining_millis)
  }

  /// Every scheduled key with its expiration in Unix seconds
  pub fn key_expirations(&self) -> BTreeMap<String, i64> {
    self
      .state
      .key_exps
      .iter()
      .map(|(k, t)| (k.clone(), t.expiration()))
      .collect()
  }
}

impl Cache {
  fn fire_key_ttl(cache: &Cache, key: &str, timer_id: u64) {
    let mut guard = cache.acquire("ttl-expiration");
    let current = guard.state.key_exps.get(key).map(Timer::id);
    if current != Some(timer_id) {
      return;
    }
    cache.touch();
    guard.remove_path(key);
    tracing::debug!(cache = %cache.name, key, "Key expired");
  }
}

#[cfg(test)]
mod tests {
  use crate::cache::Cache;
  use crate::error::CacheError;
  use serde_json::json;
  use std::time::Duration;

  #[tokio::test]
  async fn test_key_expires() {
    let cache = Cache::with_data("t", "/", json!({"s": "v", "keep": 1}));
    cache.acquire("t").set_key_ttl("s", 20).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let guard = cache.acquire("t");
    assert!(matches!(guard.get("s"), Err(CacheError::KeyNotFound(_))));
    assert_eq!(guard.get("keep").unwrap(), json!(1));
    assert!(guard.key_expirations().is_empty());
  }

  #[tokio::test]
  async fn test_cancel_key_ttl() {
    let cache = Cache::with_data("t", "/", json!({"s": "v"}));
    {
      let mut guard = cache.acquire("t");
      guard.set_key_ttl("s", 30).unwrap();
      assert!(guard.key_ttl_millis("s").is_some());
      guard.cancel_key_ttl("s").unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.acquire("t").get("s").unwrap(), json!("v"));
  }

  #[tokio::test]
  async fn test_reset_ttl_replaces_timer() {
    let cache = Cache::with_data("t", "/", json!({"s": "v"}));
    {
      let mut guard = cache.acquire("t");
      guard.set_key_ttl("s", 30).unwrap();
      guard.set_key_ttl("s", 60_000).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let guard = cache.acquire("t");
    assert!(guard.exists("s"));
    assert_eq!(guard.key_expirations().len(), 1);
  }

  #[tokio::test]
  async fn test_delete_clears_nested_ttls() {
    let cache = Cache::with_data("t", "/", json!({"a": {"b": 1, "c": 2}, "ab": 3}));
    let mut guard = cache.acquire("t");
    guard.set_key_ttl("a/b", 60_000).unwrap();
    guard.set_key_ttl("ab", 60_000).unwrap();
    guard.delete(&["a"]).unwrap();
    let exps = guard.key_expirations();
    assert!(!exps.contains_key("a/b"));
    assert!(exps.contains_key("ab"));
  }

  #[tokio::test]
  async fn test_close_stops_timers() {
    let cache = Cache::with_data("t", "/", json!({"s": "v"}));
    cache.acquire("t").set_key_ttl("s", 20).unwrap();
    cache.close();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.acquire("t").exists("s"));
  }
}
