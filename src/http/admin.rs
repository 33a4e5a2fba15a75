//! Backup and restore endpoints under `/admin`
//!
//! Filenames are relative to the configured backup directory.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{AppError, AppState};
use crate::backup;
use crate::error::CacheError;

pub(super) fn routes() -> Router<AppState> {
  Router::new()
    .route("/admin/backup", post(backup_cache))
    .route("/admin/restore", post(restore_cache))
}

#[derive(Debug, Deserialize)]
struct BackupRequest {
  cache: String,
  filename: String,
}

#[derive(Debug, Deserialize)]
struct RestoreRequest {
  /// Name to restore under; defaults to the name stored in the file
  #[serde(default)]
  cache: Option<String>,
  filename: String,
}

#[derive(Debug, Serialize)]
struct AdminResponse {
  cache: String,
  filename: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  bytes: Option<usize>,
}

fn backup_path(state: &AppState, filename: &str) -> Result<PathBuf, AppError> {
  Ok(backup::resolve_path(Path::new(&state.config.backup_dir), filename)?)
}

async fn backup_cache(
  State(state): State<AppState>,
  body: Result<Json<BackupRequest>, JsonRejection>,
) -> Result<Json<AdminResponse>, AppError> {
  let Json(req) = body?;
  let path = backup_path(&state, &req.filename)?;
  let bytes = backup::backup_to_file(&state.registry, &req.cache, &path).await?;
  Ok(Json(AdminResponse {
    cache: req.cache,
    filename: req.filename,
    bytes: Some(bytes),
  }))
}

async fn restore_cache(
  State(state): State<AppState>,
  body: Result<Json<RestoreRequest>, JsonRejection>,
) -> Result<Json<AdminResponse>, AppError> {
  let Json(req) = body?;
  let path = backup_path(&state, &req.filename)?;
  let name = req.cache.as_deref().filter(|n| !n.is_empty());
  let cache = match backup::restore_from_file(&state.registry, &path, name).await {
    Ok(cache) => cache,
    Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(AppError::bad_request(format!(
        "backup file not found: {}",
        req.filename
      )));
    }
    Err(e) => return Err(e.into()),
  };
  Ok(Json(AdminResponse {
    cache: cache.name().to_string(),
    filename: req.filename,
    bytes: None,
  }))
}
