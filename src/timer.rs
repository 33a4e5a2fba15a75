//! One-shot cancellable timers
//!
//! A timer records its absolute expiration and runs a scheduled action
//! on the tokio runtime once the deadline passes. Actions run on the
//! blocking pool since they usually acquire a cache.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{CacheError, Result};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduled one-shot action with an absolute expiration
#[derive(Debug)]
pub struct Timer {
  id: u64,
  expires_at: DateTime<Utc>,
  stopped: Arc<AtomicBool>,
  handle: JoinHandle<()>,
}

impl Timer {
  /// Schedule `action` to run after `millis` milliseconds. Zero or
  /// negative delays fire on the next scheduler turn.
  ///
  /// Requires a running tokio runtime.
  pub fn schedule<F>(millis: i64, action: F) -> Result<Self>
  where
    F: FnOnce(u64) + Send + 'static,
  {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|_| CacheError::Internal("timers require a tokio runtime".to_string()))?;

    let expires_at = ChronoDuration::try_milliseconds(millis.max(0))
      .and_then(|delta| Utc::now().checked_add_signed(delta))
      .ok_or(CacheError::InvalidTtl(millis))?;
    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    let delay = Duration::from_millis(millis.max(0) as u64);
    let stopped = Arc::new(AtomicBool::new(false));

    let flag = stopped.clone();
    let handle = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      if flag.swap(true, Ordering::SeqCst) {
        return;
      }
      if let Err(e) = tokio::task::spawn_blocking(move || action(id)).await {
        tracing::error!(timer = id, "Timer action failed: {}", e);
      }
    });

    Ok(Self {
      id,
      expires_at,
      stopped,
      handle,
    })
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// Absolute expiration as Unix seconds
  pub fn expiration(&self) -> i64 {
    self.expires_at.timestamp()
  }

  /// Absolute expiration as Unix milliseconds
  pub fn expiration_millis(&self) -> i64 {
    self.expires_at.timestamp_millis()
  }

  /// Milliseconds left before the timer fires (never negative)
  pub fn remaining_millis(&self) -> i64 {
    (self.expires_at - Utc::now()).num_milliseconds().max(0)
  }

  /// Cancel the timer. Returns true if this call prevented the action
  /// from running; repeated calls are harmless.
  pub fn stop(&self) -> bool {
    let prevented = !self.stopped.swap(true, Ordering::SeqCst);
    if prevented {
      self.handle.abort();
    }
    prevented
  }

}

impl Drop for Timer {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[tokio::test]
  async fn test_timer_fires_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let timer = Timer::schedule(10, move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!timer.stop());
  }

  #[tokio::test]
  async fn test_stop_is_idempotent_and_prevents_fire() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let timer = Timer::schedule(50, move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timer.stop());
    assert!(!timer.stop());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_out_of_range_delay_is_rejected() {
    let err = Timer::schedule(i64::MAX, |_| {}).unwrap_err();
    assert!(matches!(err, CacheError::InvalidTtl(i64::MAX)));
  }

  #[tokio::test]
  async fn test_expiration_is_in_the_future() {
    let timer = Timer::schedule(60_000, |_| {}).unwrap();
    let now = Utc::now().timestamp();
    assert!(timer.expiration() >= now + 59);
    assert!(timer.remaining_millis() > 59_000);
    timer.stop();
  }

  #[test]
  fn test_schedule_without_runtime_fails() {
    assert!(Timer::schedule(10, |_| {}).is_err());
  }
}
