use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Millisecond wall clock. Everything time-dependent in the crate reads time
/// through this so tests can drive it by hand.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
  }
}

#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicU64,
}

impl ManualClock {
  pub fn new(start_ms: u64) -> Self {
    ManualClock {
      now: AtomicU64::new(start_ms),
    }
  }

  pub fn advance(&self, ms: u64) {
    self.now.fetch_add(ms, Ordering::SeqCst);
  }

  pub fn set(&self, ms: u64) {
    self.now.store(ms, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
}
