//! Cache management endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppError, AppState};
use crate::cache::OperationExecution;
use crate::registry::DEFAULT_NAME;

pub(super) fn routes() -> Router<AppState> {
  Router::new()
    .route("/caches", get(list_caches).post(create_cache))
    .route("/caches/stats", get(cache_stats))
    .route("/caches/{name}", put(update_cache).delete(delete_cache))
}

async fn list_caches(State(state): State<AppState>) -> Json<Vec<String>> {
  Json(state.registry.list())
}

#[derive(Debug, Deserialize)]
struct CreateCacheRequest {
  #[serde(default)]
  name: String,
  /// Milliseconds until the cache is removed
  ttl: Option<i64>,
}

async fn create_cache(
  State(state): State<AppState>,
  body: Result<Json<CreateCacheRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  if req.name.is_empty() {
    return Err(AppError::bad_request("cache name is required"));
  }
  state.registry.add_cache(&req.name)?;
  tracing::info!(cache = %req.name, "Cache created");

  if let Some(ttl) = req.ttl {
    if let Err(e) = state.registry.set_cache_ttl(&req.name, ttl) {
      tracing::error!(cache = %req.name, error = %e, "Could not set cache expiration");
    }
  }
  Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct UpdateCacheRequest {
  /// Milliseconds; absent or `null` removes the expiration
  ttl: Option<i64>,
}

async fn update_cache(
  State(state): State<AppState>,
  Path(name): Path<String>,
  body: Result<Json<UpdateCacheRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  if name == DEFAULT_NAME {
    return Err(AppError::bad_request("cannot modify the default cache"));
  }
  match req.ttl {
    Some(ttl) => state.registry.set_cache_ttl(&name, ttl)?,
    None => state.registry.cancel_cache_ttl(&name)?,
  }
  Ok(StatusCode::NO_CONTENT)
}

async fn delete_cache(
  State(state): State<AppState>,
  Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
  state.registry.delete_cache(&name)?;
  Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
struct CacheStats {
  name: String,
  size_bytes: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  ttl_ms: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  last_accessed: Option<DateTime<Utc>>,
  activity_count: u64,
  long_operations: Vec<OperationExecution>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
  caches: Vec<CacheStats>,
}

async fn cache_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
  let caches = state
    .registry
    .caches()
    .iter()
    .map(|cache| CacheStats {
      name: cache.name().to_string(),
      size_bytes: cache.size_bytes(),
      ttl_ms: cache.ttl_millis(),
      last_accessed: cache.last_accessed(),
      activity_count: cache.activity_count(),
      long_operations: cache.operation_stats(),
    })
    .collect();
  Ok(Json(StatsResponse { caches }))
}
