//! Error types shared by the cache engine and its protocol surfaces

use thiserror::Error;

/// Coarse error classification used by the HTTP and RESP boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  AlreadyExists,
  TypeMismatch,
  Validation,
  Evaluation,
  RecursionLimit,
  Timeout,
  Protocol,
  Internal,
}

/// Errors produced by cache, command and registry operations
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("key not found: {0}")]
  KeyNotFound(String),

  #[error("key already exists: {0}")]
  KeyAlreadyExists(String),

  #[error("single path key required: {0}")]
  SinglePathKeyRequired(String),

  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("not an array: {0}")]
  NotAnArray(String),

  #[error("index out of bounds: {index} at {key}")]
  IndexOutOfBounds { key: String, index: i64 },

  #[error("not a number")]
  NotANumber,

  #[error("invalid array size: {0}")]
  InvalidSize(i64),

  #[error("cache not found: {0}")]
  CacheNotFound(String),

  #[error("cache already exists: {0}")]
  CacheAlreadyExists(String),

  #[error("{0}")]
  Forbidden(String),

  #[error("trigger not found: {0}")]
  TriggerNotFound(String),

  #[error("trigger recursion depth limit exceeded (max: {0}) - possible infinite loop detected")]
  RecursionLimit(usize),

  #[error("trigger execution failed: {0}")]
  TriggerFailed(Box<CacheError>),

  #[error("invalid expire time: {0}")]
  InvalidTtl(i64),

  #[error("invalid FOR expression: {0}")]
  InvalidForExpression(String),

  #[error("FOR expression must include a wildcard: {0}")]
  ForNeedsWildcard(String),

  #[error("wildcards not allowed in templated string: {0:?}")]
  WildcardInTemplate(String),

  #[error("wildcards not allowed with fallback operator: {0:?}")]
  WildcardWithFallback(String),

  #[error("fallback expression must have exactly 2 parts (key || default), got {parts} parts in: {expr:?}")]
  InvalidFallback { parts: usize, expr: String },

  #[error("interpolation error for key {key:?}: {source}")]
  Interpolation {
    key: String,
    #[source]
    source: Box<CacheError>,
  },

  #[error("invalid expression: {0}")]
  InvalidExpression(String),

  #[error("evaluation error: {0}")]
  Evaluation(String),

  #[error("expression did not return a boolean")]
  NotBoolean,

  #[error("invalid command: {0}")]
  InvalidCommand(String),

  #[error("operation timed out")]
  Timeout,

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("internal error: {0}")]
  Internal(String),
}

impl CacheError {
  /// Classify the error, looking through trigger and interpolation wrappers
  pub fn kind(&self) -> ErrorKind {
    match self {
      CacheError::KeyNotFound(_)
      | CacheError::IndexOutOfBounds { .. }
      | CacheError::CacheNotFound(_)
      | CacheError::TriggerNotFound(_) => ErrorKind::NotFound,
      CacheError::KeyAlreadyExists(_) | CacheError::CacheAlreadyExists(_) => {
        ErrorKind::AlreadyExists
      }
      CacheError::NotAnArray(_) | CacheError::NotANumber => ErrorKind::TypeMismatch,
      CacheError::SinglePathKeyRequired(_)
      | CacheError::InvalidKey(_)
      | CacheError::InvalidSize(_)
      | CacheError::Forbidden(_)
      | CacheError::InvalidTtl(_)
      | CacheError::InvalidForExpression(_)
      | CacheError::ForNeedsWildcard(_)
      | CacheError::WildcardWithFallback(_)
      | CacheError::InvalidFallback { .. }
      | CacheError::InvalidCommand(_) => ErrorKind::Validation,
      CacheError::WildcardInTemplate(_)
      | CacheError::InvalidExpression(_)
      | CacheError::Evaluation(_)
      | CacheError::NotBoolean => ErrorKind::Evaluation,
      CacheError::RecursionLimit(_) => ErrorKind::RecursionLimit,
      CacheError::TriggerFailed(inner) => inner.kind(),
      CacheError::Interpolation { source, .. } => source.kind(),
      CacheError::Timeout => ErrorKind::Timeout,
      CacheError::Protocol(_) | CacheError::Serialization(_) => ErrorKind::Protocol,
      CacheError::Io(_) | CacheError::Internal(_) => ErrorKind::Internal,
    }
  }

  /// Innermost error after unwrapping trigger and interpolation layers
  pub fn root(&self) -> &CacheError {
    match self {
      CacheError::TriggerFailed(inner) => inner.root(),
      CacheError::Interpolation { source, .. } => source.root(),
      other => other,
    }
  }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_looks_through_trigger_wrapper() {
    let err = CacheError::TriggerFailed(Box::new(CacheError::TriggerFailed(Box::new(
      CacheError::RecursionLimit(10),
    ))));
    assert_eq!(err.kind(), ErrorKind::RecursionLimit);
    assert!(matches!(err.root(), CacheError::RecursionLimit(10)));
  }

  #[test]
  fn test_messages() {
    assert_eq!(
      CacheError::KeyNotFound("a/b".into()).to_string(),
      "key not found: a/b"
    );
    assert_eq!(
      CacheError::RecursionLimit(10).to_string(),
      "trigger recursion depth limit exceeded (max: 10) - possible infinite loop detected"
    );
    assert_eq!(CacheError::NotANumber.kind(), ErrorKind::TypeMismatch);
  }
}
