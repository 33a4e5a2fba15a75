//! Bounded history of slow operations

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of operations kept per cache
pub const DEFAULT_STATS_CAPACITY: usize = 100;

/// One operation that exceeded the long-operation threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationExecution {
  pub timestamp: DateTime<Utc>,
  pub duration_ms: u64,
  pub operation: String,
  pub success: bool,
  pub timed_out: bool,
}

/// Ring buffer of recent long operations, guarded by its own lock
#[derive(Debug)]
pub struct OperationStats {
  history: RwLock<VecDeque<OperationExecution>>,
  capacity: usize,
}

impl Default for OperationStats {
  fn default() -> Self {
    Self::new(DEFAULT_STATS_CAPACITY)
  }
}

impl OperationStats {
  pub fn new(capacity: usize) -> Self {
    Self {
      history: RwLock::new(VecDeque::with_capacity(capacity)),
      capacity: capacity.max(1),
    }
  }

  pub fn record(&self, duration: Duration, operation: &str, success: bool, timed_out: bool) {
    let exec = OperationExecution {
      timestamp: Utc::now(),
      duration_ms: duration.as_millis() as u64,
      operation: operation.to_string(),
      success,
      timed_out,
    };

    let mut history = self.history.write();
    if history.len() >= self.capacity {
      history.pop_front();
    }
    history.push_back(exec);
  }

  /// Oldest-first copy of the history
  pub fn snapshot(&self) -> Vec<OperationExecution> {
    self.history.read().iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.history.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.history.read().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ring_drops_oldest() {
    let stats = OperationStats::new(3);
    for i in 0..5 {
      stats.record(Duration::from_millis(i), &format!("op{}", i), true, false);
    }
    let snap = stats.snapshot();
    assert_eq!(snap.len(), 3);
    assert_eq!(snap[0].operation, "op2");
    assert_eq!(snap[2].operation, "op4");
    assert_eq!(snap[2].duration_ms, 4);
  }
}
