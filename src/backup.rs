//! Cache backup and restore
//!
//! A backup is a JSON document holding the cache data, per-key
//! expirations and triggers (Unix seconds for expirations):
//!
//! ```json
//! {"name": "default", "data": {}, "key_expirations": {"k": 1700000000},
//!  "triggers": {"a/*": [{"id": "…", "key": "a/*", "command": {"type": "NOOP"}}]},
//!  "expiration": null}
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::cache::{Cache, CacheGuard, Trigger};
use crate::error::{CacheError, Result};
use crate::registry::{Registry, DEFAULT_NAME};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Backup {
  pub name: String,
  pub data: Value,
  #[serde(default)]
  pub key_expirations: BTreeMap<String, i64>,
  #[serde(default)]
  pub triggers: BTreeMap<String, Vec<Trigger>>,
  #[serde(default)]
  pub expiration: Option<i64>,
}

impl Backup {
  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(self)?)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    Ok(serde_json::from_slice(bytes)?)
  }
}

/// Capture the state of a held cache
pub fn backup(guard: &CacheGuard<'_>) -> Backup {
  let cache = guard.cache();
  Backup {
    name: cache.name().to_string(),
    data: guard.data(),
    key_expirations: guard.key_expirations(),
    triggers: guard.triggers(),
    expiration: cache.expiration(),
  }
}

/// Rebuild a cache from `backup` and install it in the registry.
///
/// The cache is registered as `name`, falling back to the name stored in
/// the backup and then to `default`. Expirations already in the past are
/// skipped; future ones are rescheduled.
pub fn restore(registry: &Registry, backup: Backup, name: Option<&str>) -> Result<Arc<Cache>> {
  let name = match name {
    Some(n) if !n.is_empty() => n.to_string(),
    _ if !backup.name.is_empty() => backup.name.clone(),
    _ => DEFAULT_NAME.to_string(),
  };
  let now_ms = Utc::now().timestamp_millis();

  let cache = Cache::with_data(&name, registry.delimiter(), backup.data);
  {
    let mut guard = cache.acquire("restore");
    for (pattern, triggers) in backup.triggers {
      for trigger in triggers {
        guard.insert_trigger(Trigger {
          key: pattern.clone(),
          ..trigger
        });
      }
    }
    for (key, expiration) in backup.key_expirations {
      let remaining = expiration.saturating_mul(1000).saturating_sub(now_ms);
      if remaining <= 0 {
        tracing::warn!(cache = %name, key = %key, "Skipping expired key during restore");
        continue;
      }
      guard.set_key_ttl(&key, remaining)?;
    }
  }

  registry.install(cache.clone());

  if let Some(expiration) = backup.expiration {
    let remaining = expiration.saturating_mul(1000).saturating_sub(now_ms);
    if name != DEFAULT_NAME && remaining > 0 {
      registry.set_cache_ttl(&name, remaining)?;
    }
  }

  tracing::info!(cache = %name, "Cache restored");
  Ok(cache)
}

/// Resolve `filename` under `dir`, refusing absolute paths and `..`
pub fn resolve_path(dir: &Path, filename: &str) -> Result<PathBuf> {
  if filename.is_empty() {
    return Err(CacheError::InvalidKey("filename is required".to_string()));
  }
  let relative = Path::new(filename);
  if relative.is_absolute() || filename.starts_with('/') || filename.starts_with('\\') {
    return Err(CacheError::Forbidden(
      "filename must be a relative path".to_string(),
    ));
  }
  if filename.contains("..")
    || relative
      .components()
      .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
  {
    return Err(CacheError::Forbidden(
      "filename cannot contain '..'".to_string(),
    ));
  }
  Ok(dir.join(relative))
}

/// Write a backup, going through a temporary file and a rename
pub async fn save(path: &Path, backup: &Backup) -> Result<usize> {
  let bytes = backup.to_bytes()?;
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent).await?;
    }
  }

  let temp_path = path.with_extension("tmp");
  let mut file = fs::File::create(&temp_path).await?;
  file.write_all(&bytes).await?;
  file.sync_all().await?;
  drop(file);
  fs::rename(&temp_path, path).await?;

  tracing::info!(cache = %backup.name, path = %path.display(), bytes = bytes.len(), "Backup saved");
  Ok(bytes.len())
}

/// Read a backup file
pub async fn load(path: &Path) -> Result<Backup> {
  let bytes = fs::read(path).await?;
  if bytes.is_empty() {
    return Err(CacheError::Protocol(format!(
      "backup file is empty: {}",
      path.display()
    )));
  }
  Backup::from_bytes(&bytes)
}

/// Back up the cache `name` into `path`
pub async fn backup_to_file(registry: &Registry, name: &str, path: &Path) -> Result<usize> {
  let cache = registry.fetch_cache(name)?;
  let snapshot = tokio::task::spawn_blocking(move || {
    let guard = cache.acquire("backup");
    backup(&guard)
  })
  .await
  .map_err(|e| CacheError::Internal(e.to_string()))?;
  save(path, &snapshot).await
}

/// Restore the backup at `path`, optionally under another name
pub async fn restore_from_file(
  registry: &Registry,
  path: &Path,
  name: Option<&str>,
) -> Result<Arc<Cache>> {
  let snapshot = load(path).await?;
  let registry = registry.clone();
  let name = name.map(str::to_string);
  tokio::task::spawn_blocking(move || restore(&registry, snapshot, name.as_deref()))
    .await
    .map_err(|e| CacheError::Internal(e.to_string()))?
}
