//! HTTP error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{CacheError, ErrorKind};

/// Error returned by every handler; rendered as `{"message": ...}`
#[derive(Debug)]
pub enum AppError {
  Cache(CacheError),
  BadRequest(String),
  /// The cache named by `X-Cache-Name` does not exist
  CacheNotFound,
}

impl AppError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::CacheNotFound => StatusCode::FAILED_DEPENDENCY,
      Self::Cache(e) => status_for(e.kind()),
    }
  }
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::AlreadyExists => StatusCode::CONFLICT,
    ErrorKind::TypeMismatch
    | ErrorKind::Validation
    | ErrorKind::Evaluation
    | ErrorKind::Protocol => StatusCode::BAD_REQUEST,
    ErrorKind::RecursionLimit => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl From<CacheError> for AppError {
  fn from(e: CacheError) -> Self {
    Self::Cache(e)
  }
}

impl From<JsonRejection> for AppError {
  fn from(e: JsonRejection) -> Self {
    tracing::debug!(error = %e, "Rejected request body");
    Self::BadRequest("invalid json payload".to_string())
  }
}

impl std::fmt::Display for AppError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Cache(e) => write!(f, "{}", e),
      Self::BadRequest(msg) => write!(f, "{}", msg),
      Self::CacheNotFound => write!(f, "cache not found"),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
      tracing::error!(error = %self, "Request failed");
      "internal server error".to_string()
    } else {
      tracing::debug!(status = status.as_u16(), error = %self, "Request failed");
      self.to_string()
    };
    (status, Json(serde_json::json!({ "message": message }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    let cases = [
      (CacheError::KeyNotFound("a".into()), StatusCode::NOT_FOUND),
      (CacheError::KeyAlreadyExists("a".into()), StatusCode::CONFLICT),
      (CacheError::NotANumber, StatusCode::BAD_REQUEST),
      (CacheError::InvalidKey("".into()), StatusCode::BAD_REQUEST),
      (CacheError::NotBoolean, StatusCode::BAD_REQUEST),
      (CacheError::RecursionLimit(10), StatusCode::UNPROCESSABLE_ENTITY),
      (CacheError::Timeout, StatusCode::REQUEST_TIMEOUT),
      (CacheError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, status) in cases {
      assert_eq!(AppError::from(err).status(), status);
    }
    assert_eq!(AppError::CacheNotFound.status(), StatusCode::FAILED_DEPENDENCY);
  }

  #[test]
  fn test_trigger_wrapper_keeps_status() {
    let err = CacheError::TriggerFailed(Box::new(CacheError::RecursionLimit(10)));
    assert_eq!(AppError::from(err).status(), StatusCode::UNPROCESSABLE_ENTITY);
  }
}
