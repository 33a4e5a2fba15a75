//! Key endpoints under `/cache`

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put, MethodRouter};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{AppError, AppState, CacheScope};

pub(super) fn routes() -> Router<AppState> {
  Router::new()
    .route("/cache", post(create_keys).put(replace_batch))
    .route("/cache/get", literal_key("get").post(get_batch))
    .route("/cache/delete", literal_key("delete").post(delete_batch))
    .route(
      "/cache/{*key}",
      put(replace_value).get(get_value).delete(delete_value),
    )
}

/// Single-key GET/PUT/DELETE for a key whose path is taken by a batch route
fn literal_key(key: &'static str) -> MethodRouter<AppState> {
  get(move |state: State<AppState>, scope: CacheScope| {
    get_value(state, scope, Path(key.to_string()))
  })
  .put(
    move |state: State<AppState>,
          scope: CacheScope,
          body: Result<Json<PutRequest>, JsonRejection>| {
      replace_value(state, scope, Path(key.to_string()), body)
    },
  )
  .delete(move |state: State<AppState>, scope: CacheScope| {
    delete_value(state, scope, Path(key.to_string()))
  })
}

fn check_keys<'a>(keys: impl IntoIterator<Item = &'a String>) -> Result<(), AppError> {
  if keys.into_iter().any(|k| k.is_empty()) {
    return Err(AppError::bad_request("key cannot be empty"));
  }
  Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateKeysRequest {
  #[serde(default)]
  entries: Map<String, Value>,
  /// Milliseconds per key
  #[serde(default)]
  ttl: HashMap<String, i64>,
}

impl CreateKeysRequest {
  fn validate(&self) -> Result<(), AppError> {
    if self.entries.is_empty() {
      return Err(AppError::bad_request("at least one entry is required"));
    }
    check_keys(self.entries.keys())?;
    if let Some(key) = self.ttl.keys().find(|k| !self.entries.contains_key(*k)) {
      return Err(AppError::bad_request(format!(
        "TTL specified for non-existent key: {}",
        key
      )));
    }
    Ok(())
  }
}

async fn create_keys(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<CreateKeysRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  req.validate()?;
  scope
    .run(&state, "create", move |guard, _| {
      guard.create(req.entries)?;
      for (key, ttl) in &req.ttl {
        if let Err(e) = guard.set_key_ttl(key, *ttl) {
          tracing::error!(key = %key, ttl_ms = ttl, error = %e, "Could not set key expiration");
        }
      }
      Ok(())
    })
    .await?;
  Ok(StatusCode::CREATED)
}

async fn get_value(
  State(state): State<AppState>,
  scope: CacheScope,
  Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
  let value = scope.run(&state, "get", move |guard, _| guard.get(&key)).await?;
  Ok(Json(value))
}

#[derive(Debug, Deserialize)]
struct KeysRequest {
  #[serde(default)]
  keys: Vec<String>,
}

impl KeysRequest {
  fn validate(&self) -> Result<(), AppError> {
    if self.keys.is_empty() {
      return Err(AppError::bad_request("at least one key is required"));
    }
    check_keys(&self.keys)
  }
}

async fn get_batch(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<KeysRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
  let Json(req) = body?;
  req.validate()?;
  let values = scope
    .run(&state, "batch_get", move |guard, _| guard.batch_get(&req.keys))
    .await?;
  Ok(Json(values))
}

#[derive(Debug, Deserialize)]
struct PutRequest {
  #[serde(default)]
  value: Value,
}

async fn replace_value(
  State(state): State<AppState>,
  scope: CacheScope,
  Path(key): Path<String>,
  body: Result<Json<PutRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  scope
    .run(&state, "replace", move |guard, ctx| guard.replace(ctx, &key, req.value))
    .await?;
  Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct ReplaceBatchRequest {
  #[serde(default)]
  entries: Map<String, Value>,
  /// Milliseconds per key; `null` removes the key's expiration
  #[serde(default)]
  ttl: HashMap<String, Option<i64>>,
}

async fn replace_batch(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<ReplaceBatchRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  check_keys(req.entries.keys())?;
  scope
    .run(&state, "replace_batch", move |guard, _| {
      guard.replace_batch(req.entries)?;
      for (key, ttl) in &req.ttl {
        let result = match ttl {
          Some(ms) => guard.set_key_ttl(key, *ms),
          None => guard.cancel_key_ttl(key),
        };
        if let Err(e) = result {
          tracing::warn!(key = %key, error = %e, "Could not update key expiration");
        }
      }
      Ok(())
    })
    .await?;
  Ok(StatusCode::OK)
}

async fn delete_value(
  State(state): State<AppState>,
  scope: CacheScope,
  Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
  scope.run(&state, "delete", move |guard, _| guard.delete(&[key])).await?;
  Ok(StatusCode::OK)
}

async fn delete_batch(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<KeysRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  req.validate()?;
  scope
    .run(&state, "delete", move |guard, _| guard.delete(&req.keys))
    .await?;
  Ok(StatusCode::OK)
}
