//! Evaluation context threaded through command execution

use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{CacheError, Result};

/// Per-execution state: trigger depth, deadline and the change being
/// dispatched when running inside a trigger.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
  depth: usize,
  deadline: Option<Instant>,
  old_value: Option<Value>,
  new_value: Option<Value>,
}

impl ExecContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_deadline(deadline: Instant) -> Self {
    Self {
      deadline: Some(deadline),
      ..Self::default()
    }
  }

  pub fn with_timeout(timeout: Duration) -> Self {
    Self::with_deadline(Instant::now() + timeout)
  }

  /// Number of trigger frames enclosing this context
  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  pub fn old_value(&self) -> Option<&Value> {
    self.old_value.as_ref()
  }

  pub fn new_value(&self) -> Option<&Value> {
    self.new_value.as_ref()
  }

  /// Fail with a timeout once the deadline has passed
  pub fn check_deadline(&self) -> Result<()> {
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Err(CacheError::Timeout),
      _ => Ok(()),
    }
  }

  /// Context for a trigger fired by a change from `old` to `new`
  pub fn for_trigger(&self, old: Value, new: Value) -> Self {
    Self {
      depth: self.depth + 1,
      deadline: self.deadline,
      old_value: Some(old),
      new_value: Some(new),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_trigger_context_increments_depth() {
    let ctx = ExecContext::new();
    let nested = ctx.for_trigger(json!(1), json!(2));
    assert_eq!(nested.depth(), 1);
    assert_eq!(nested.old_value(), Some(&json!(1)));
    assert_eq!(nested.for_trigger(json!(2), json!(3)).depth(), 2);
  }

  #[test]
  fn test_deadline() {
    assert!(ExecContext::new().check_deadline().is_ok());
    let past = ExecContext::with_deadline(Instant::now() - Duration::from_millis(1));
    assert!(matches!(past.check_deadline(), Err(CacheError::Timeout)));
    assert!(ExecContext::with_timeout(Duration::from_secs(60)).check_deadline().is_ok());
  }
}
