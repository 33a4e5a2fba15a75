//! Command execution endpoint

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::{AppError, AppState, CacheScope};
use crate::command::{self, Command};

pub(super) fn routes() -> Router<AppState> {
  Router::new()
    .route("/commands", post(execute))
    .route("/commands/execute", post(execute))
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
  #[serde(default)]
  commands: Vec<Value>,
}

/// Run the commands in order; the reply is the list of their results
async fn execute(
  State(state): State<AppState>,
  scope: CacheScope,
  body: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
  let Json(req) = body?;
  if req.commands.is_empty() {
    return Err(AppError::bad_request("at least one command is required"));
  }
  let commands = Command::list_from_json(req.commands)?;
  let value = scope
    .run(&state, "commands", move |guard, ctx| {
      command::execute_all(&commands, guard, ctx)
    })
    .await?;
  Ok(Json(value))
}
