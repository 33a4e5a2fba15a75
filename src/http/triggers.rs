//! Trigger endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{AppError, AppState, CacheScope};
use crate::cache::Trigger;
use crate::command::Command;

pub(super) fn routes() -> Router<AppState> {
  Router::new()
    .route("/triggers", get(list_triggers).post(create_trigger))
    .route("/triggers/{id}", put(replace_trigger).delete(delete_trigger))
}

#[derive(Debug, Deserialize)]
struct CreateTriggerRequest {
  key: String,
  command: Value,
}

/// Registered triggers grouped by key pattern
async fn list_triggers(
  State(state): State<AppState>,
  scope: CacheScope,
) -> Result<Json<BTreeMap<String, Vec<Trigger>>>, AppError> {
  let triggers = scope.run(&state, "triggers", |guard, _| Ok(guard.triggers())).await?;
  Ok(Json(triggers))
}

/// Register a trigger; the reply is its id
async fn create_trigger(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<CreateTriggerRequest>, JsonRejection>,
) -> Result<Json<String>, AppError> {
  let Json(req) = body?;
  let command = Command::from_json(req.command)?;
  let id = scope
    .run(&state, "create_trigger", move |guard, _| {
      guard.create_trigger(&req.key, command)
    })
    .await?;
  tracing::debug!(trigger_id = %id, "Trigger created");
  Ok(Json(id))
}

#[derive(Debug, Deserialize)]
struct ReplaceTriggerRequest {
  id: String,
  key: String,
  command: Value,
}

async fn replace_trigger(
  State(state): State<AppState>,
  scope: CacheScope,
  Path(id): Path<String>,
  body: Result<Json<ReplaceTriggerRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Json(req) = body?;
  if req.id != id {
    return Err(AppError::bad_request("payload id must match request id"));
  }
  let trigger = Trigger {
    id: req.id,
    key: req.key,
    command: Command::from_json(req.command)?,
  };
  scope
    .run(&state, "replace_trigger", move |guard, _| {
      guard.replace_trigger(&id, trigger)
    })
    .await?;
  Ok(StatusCode::NO_CONTENT)
}

async fn delete_trigger(
  State(state): State<AppState>,
  scope: CacheScope,
  Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
  scope
    .run(&state, "delete_trigger", move |guard, _| guard.delete_trigger(&id))
    .await?;
  Ok(StatusCode::OK)
}
