//! Cache object
//!
//! A [`Cache`] wraps one [`Document`] behind an exclusive ownership token.
//! [`Cache::acquire`] blocks until the token is free and hands out a
//! [`CacheGuard`]; every read and mutation of the document goes through
//! the guard. Activity counters, the operation-stats ring and the
//! cache-wide expiration can be read without holding the token.

mod expire;
mod stats;
mod triggers;

pub use stats::{OperationExecution, OperationStats, DEFAULT_STATS_CAPACITY};
pub use triggers::{Trigger, MAX_TRIGGER_DEPTH};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::command::ExecContext;
use crate::document::{self, Document};
use crate::error::{CacheError, Result};
use crate::path;
use crate::timer::Timer;

/// State protected by the ownership token
pub(crate) struct CacheState {
  doc: Document,
  key_exps: HashMap<String, Timer>,
  triggers: BTreeMap<String, Vec<Trigger>>,
}

/// A named hierarchical document with its timers and triggers
pub struct Cache {
  name: String,
  this: Weak<Cache>,
  state: Mutex<CacheState>,
  owner: Mutex<Option<String>>,
  expiration: Mutex<Option<Timer>>,
  activity: AtomicU64,
  last_accessed: Mutex<Option<DateTime<Utc>>>,
  stats: OperationStats,
  // Size of the document as of `size_revision`, refreshed on guard drop
  size: AtomicUsize,
  size_revision: AtomicU64,
}

impl std::fmt::Debug for Cache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache")
      .field("name", &self.name)
      .field("owner", &*self.owner.lock())
      .field("activity", &self.activity_count())
      .finish()
  }
}

impl Cache {
  pub fn new(name: &str, delimiter: &str) -> Arc<Self> {
    Self::with_data(name, delimiter, Value::Object(Map::new()))
  }

  pub fn with_data(name: &str, delimiter: &str, data: Value) -> Arc<Self> {
    let doc = Document::from_value(data, delimiter);
    let size = doc.size_bytes();
    Arc::new_cyclic(|this| Self {
      name: name.to_string(),
      this: this.clone(),
      state: Mutex::new(CacheState {
        doc,
        key_exps: HashMap::new(),
        triggers: BTreeMap::new(),
      }),
      owner: Mutex::new(None),
      expiration: Mutex::new(None),
      activity: AtomicU64::new(0),
      last_accessed: Mutex::new(None),
      stats: OperationStats::default(),
      size: AtomicUsize::new(size),
      size_revision: AtomicU64::new(0),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Take the ownership token, blocking until it is free
  pub fn acquire(&self, tag: &str) -> CacheGuard<'_> {
    let state = self.state.lock();
    self.guard(state, tag)
  }

  /// Take the ownership token, giving up after `timeout`
  pub fn try_acquire_for(&self, tag: &str, timeout: Duration) -> Option<CacheGuard<'_>> {
    let state = self.state.try_lock_for(timeout)?;
    Some(self.guard(state, tag))
  }

  fn guard<'a>(&'a self, state: MutexGuard<'a, CacheState>, tag: &str) -> CacheGuard<'a> {
    *self.owner.lock() = Some(tag.to_string());
    CacheGuard {
      cache: self,
      state,
      tag: tag.to_string(),
    }
  }

  /// Tag of the current holder, if any
  pub fn owner(&self) -> Option<String> {
    self.owner.lock().clone()
  }

  pub fn activity_count(&self) -> u64 {
    self.activity.load(Ordering::Relaxed)
  }

  pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
    *self.last_accessed.lock()
  }

  fn touch(&self) {
    self.activity.fetch_add(1, Ordering::Relaxed);
    *self.last_accessed.lock() = Some(Utc::now());
  }

  pub fn operation_stats(&self) -> Vec<OperationExecution> {
    self.stats.snapshot()
  }

  /// Record an operation in the stats ring if it ran for at least `threshold`
  pub fn record_operation(
    &self,
    operation: &str,
    elapsed: Duration,
    success: bool,
    timed_out: bool,
    threshold: Duration,
  ) {
    if elapsed < threshold && !timed_out {
      return;
    }
    tracing::warn!(
      cache = %self.name,
      operation,
      elapsed_ms = elapsed.as_millis() as u64,
      timed_out,
      "Long-running cache operation"
    );
    self.stats.record(elapsed, operation, success, timed_out);
  }

  /// Document size as of the last released guard. Does not wait for
  /// the ownership token.
  pub fn size_bytes(&self) -> usize {
    self.size.load(Ordering::Acquire)
  }

  fn refresh_size(&self, doc: &Document) {
    let revision = doc.revision();
    if self.size_revision.load(Ordering::Acquire) != revision {
      self.size.store(doc.size_bytes(), Ordering::Release);
      self.size_revision.store(revision, Ordering::Release);
    }
  }

  /// Unix seconds at which the whole cache expires
  pub fn expiration(&self) -> Option<i64> {
    self.expiration.lock().as_ref().map(Timer::expiration)
  }

  /// Milliseconds until the whole cache expires
  pub fn ttl_millis(&self) -> Option<i64> {
    self.expiration.lock().as_ref().map(Timer::remaining_millis)
  }

  pub(crate) fn expiration_id(&self) -> Option<u64> {
    self.expiration.lock().as_ref().map(Timer::id)
  }

  /// Install a cache-wide expiration timer, stopping any previous one
  pub(crate) fn set_expiration(&self, timer: Timer) {
    if let Some(old) = self.expiration.lock().replace(timer) {
      old.stop();
    }
  }

  pub fn cancel_expiration(&self) {
    if let Some(old) = self.expiration.lock().take() {
      old.stop();
    }
  }

  /// Stop every timer owned by this cache
  pub fn close(&self) {
    self.cancel_expiration();
    let mut state = self.state.lock();
    for (_, timer) in state.key_exps.drain() {
      timer.stop();
    }
    tracing::debug!(cache = %self.name, "Cache closed");
  }
}

/// Proof of holding a cache's ownership token
///
/// Dropping the guard releases the token. [`CacheGuard::release`] does
/// the same but first checks the tag and panics on a mismatch.
pub struct CacheGuard<'a> {
  cache: &'a Cache,
  state: MutexGuard<'a, CacheState>,
  tag: String,
}

impl Drop for CacheGuard<'_> {
  fn drop(&mut self) {
    self.cache.refresh_size(&self.state.doc);
    *self.cache.owner.lock() = None;
  }
}

impl<'a> CacheGuard<'a> {
  pub fn cache(&self) -> &'a Cache {
    self.cache
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn delimiter(&self) -> &str {
    self.state.doc.delimiter()
  }

  /// Release the token held under `tag`.
  ///
  /// # Panics
  ///
  /// Panics when `tag` is not the tag the token was acquired with.
  pub fn release(self, tag: &str) {
    if self.tag != tag {
      panic!(
        "cache '{}' released with tag '{}' but is held by '{}'",
        self.cache.name, tag, self.tag
      );
    }
  }

  pub fn get(&self, key: &str) -> Result<Value> {
    self.cache.touch();
    let tokens = path::split(key, self.delimiter());
    self.state.doc.get(&tokens).cloned()
  }

  /// Read several keys into a `{key: value}` mapping
  pub fn batch_get<S: AsRef<str>>(&self, keys: &[S]) -> Result<Value> {
    let mut out = Map::new();
    for key in keys {
      let key = key.as_ref();
      out.insert(key.to_string(), self.get(key)?);
    }
    Ok(Value::Object(out))
  }

  pub fn exists(&self, key: &str) -> bool {
    let tokens = path::split(key, self.delimiter());
    self.state.doc.exists(&tokens)
  }

  pub fn data(&self) -> Value {
    self.state.doc.data()
  }

  pub fn wild_keys(&self, pattern: &str) -> Vec<String> {
    self.state.doc.wild_keys(pattern)
  }

  pub fn size_bytes(&self) -> usize {
    self.state.doc.size_bytes()
  }

  /// Add new top-level keys. Every key is validated before any write.
  pub fn create<I>(&mut self, entries: I) -> Result<()>
  where
    I: IntoIterator<Item = (String, Value)>,
  {
    self.cache.touch();
    let entries: Vec<(String, Value)> = entries.into_iter().collect();
    for (key, _) in &entries {
      if key.is_empty() {
        return Err(CacheError::InvalidKey(key.clone()));
      }
      if path::split(key, self.delimiter()).len() != 1 {
        return Err(CacheError::SinglePathKeyRequired(key.clone()));
      }
      if self.state.doc.exists(&[key.as_str()]) {
        return Err(CacheError::KeyAlreadyExists(key.clone()));
      }
    }

    for (key, value) in entries {
      self.state.doc.set(&[key.as_str()], value)?;
    }
    Ok(())
  }

  /// Overwrite an existing key and fire matching triggers
  pub fn replace(&mut self, ctx: &ExecContext, key: &str, value: Value) -> Result<()> {
    self.cache.touch();
    let delimiter = self.delimiter().to_string();
    let tokens = path::split(key, &delimiter);
    let old = self
      .state
      .doc
      .get(&tokens)
      .map_err(|_| CacheError::KeyNotFound(key.to_string()))?
      .clone();

    self.state.doc.set(&tokens, value.clone())?;

    self.on_change(ctx, key, &old, &value).map_err(|e| match e {
      CacheError::TriggerFailed(_) => e,
      other => CacheError::TriggerFailed(Box::new(other)),
    })
  }

  /// Overwrite several existing keys. Triggers do not fire.
  pub fn replace_batch<I>(&mut self, entries: I) -> Result<()>
  where
    I: IntoIterator<Item = (String, Value)>,
  {
    self.cache.touch();
    let entries: Vec<(String, Value)> = entries.into_iter().collect();
    for (key, _) in &entries {
      if !self.exists(key) {
        return Err(CacheError::KeyNotFound(key.clone()));
      }
    }

    let delimiter = self.delimiter().to_string();
    for (key, value) in entries {
      let tokens = path::split(&key, &delimiter);
      self.state.doc.set(&tokens, value)?;
    }
    Ok(())
  }

  /// Replace the key if it exists, otherwise write it creating parents
  pub fn set(&mut self, ctx: &ExecContext, key: &str, value: Value) -> Result<()> {
    if self.exists(key) {
      return self.replace(ctx, key, value);
    }
    self.cache.touch();
    let delimiter = self.delimiter().to_string();
    let tokens = path::split(key, &delimiter);
    self.state.doc.set(&tokens, value)
  }

  /// Best-effort delete of each key along with TTLs at or below it
  pub fn delete<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<()> {
    self.cache.touch();
    for key in keys {
      self.remove_path(key.as_ref());
    }
    Ok(())
  }

  fn remove_path(&mut self, key: &str) {
    let delimiter = self.delimiter().to_string();
    let nested = format!("{}{}", key, delimiter);
    self.state.key_exps.retain(|k, timer| {
      let covered = k == key || k.starts_with(&nested);
      if covered {
        timer.stop();
      }
      !covered
    });

    let tokens = path::split(key, &delimiter);
    self.state.doc.delete(&tokens);
    tracing::trace!(cache = %self.cache.name, key, "Deleted key");
  }

  /// Add `delta` to a numeric value, writing back through [`Self::replace`]
  pub fn increment(&mut self, ctx: &ExecContext, key: &str, delta: f64) -> Result<Value> {
    let current = self.get(key)?;
    let current = document::to_f64(&current).ok_or(CacheError::NotANumber)?;
    let updated = document::number_value(current + delta);
    self.replace(ctx, key, updated.clone())?;
    Ok(updated)
  }

  pub fn array_append(&mut self, key: &str, value: Value) -> Result<()> {
    self.cache.touch();
    let delimiter = self.delimiter().to_string();
    let tokens = path::split(key, &delimiter);
    self.state.doc.array_append(&tokens, value)
  }

  pub fn array_resize(&mut self, key: &str, size: i64) -> Result<()> {
    self.cache.touch();
    let delimiter = self.delimiter().to_string();
    let tokens = path::split(key, &delimiter);
    self.state.doc.array_resize(&tokens, size)
  }

  /// Remove the element addressed by a key whose last segment is an index
  pub fn array_remove(&mut self, key: &str) -> Result<()> {
    self.cache.touch();
    let delimiter = self.delimiter().to_string();
    let tokens = path::split(key, &delimiter);
    let Some((last, parent)) = tokens.split_last() else {
      return Err(CacheError::InvalidKey(key.to_string()));
    };
    let index: i64 = last
      .parse()
      .map_err(|_| CacheError::InvalidKey(key.to_string()))?;
    self.state.doc.array_remove(parent, index)
  }
}
