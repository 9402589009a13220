/// Trailing-edge coalescer: each event pushes the deadline to `now + window`,
/// and one resync fires once the feed has been quiet for a full window.
#[derive(Debug, Clone)]
pub struct Debouncer {
  window_ms: u64,
  deadline: Option<u64>,
  coalesced: usize,
}

impl Debouncer {
  pub fn new(window_ms: u64) -> Self {
    Debouncer {
      window_ms,
      deadline: None,
      coalesced: 0,
    }
  }

  pub fn note_event(&mut self, now_ms: u64) {
    self.deadline = Some(now_ms.saturating_add(self.window_ms));
    self.coalesced += 1;
  }

  pub fn deadline(&self) -> Option<u64> {
    self.deadline
  }

  pub fn is_armed(&self) -> bool {
    self.deadline.is_some()
  }

  pub fn due(&self, now_ms: u64) -> bool {
    self.deadline.is_some_and(|deadline| now_ms >= deadline)
  }

  /// Disarm if due; returns how many events the firing covers.
  pub fn take_due(&mut self, now_ms: u64) -> Option<usize> {
    if !self.due(now_ms) {
      return None;
    }
    self.deadline = None;
    Some(std::mem::take(&mut self.coalesced))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn burst_fires_once_after_quiet_window() {
    let mut debouncer = Debouncer::new(300);
    assert!(!debouncer.is_armed());
    debouncer.note_event(0);
    debouncer.note_event(100);
    debouncer.note_event(250);
    assert_eq!(debouncer.deadline(), Some(550));
    assert_eq!(debouncer.take_due(549), None);
    assert_eq!(debouncer.take_due(550), Some(3));
    assert_eq!(debouncer.take_due(10_000), None);
  }

  #[test]
  fn zero_window_fires_immediately() {
    let mut debouncer = Debouncer::new(0);
    debouncer.note_event(42);
    assert!(debouncer.due(42));
  }
}
