//! Deduplicator (C1): time-bounded fingerprint set membership.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct Deduplicator {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl Deduplicator {
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window: Duration::from_secs(window_seconds),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Purges stale entries, then reports whether `fingerprint` has already
    /// been seen within the window. A fresh fingerprint is recorded with
    /// `now` and the call returns `false`; a repeat does *not* refresh its
    /// timestamp, since the window is measured from first sighting.
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        seen.retain(|_, &mut first_seen| now.duration_since(first_seen) < self.window);

        if seen.contains_key(fingerprint) {
            return true;
        }

        seen.insert(fingerprint.to_string(), now);
        false
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn first_sighting_is_not_duplicate() {
        let dedup = Deduplicator::new(60);
        assert!(!dedup.is_duplicate("abc123"));
    }

    #[test]
    fn repeat_within_window_is_duplicate() {
        let dedup = Deduplicator::new(60);
        assert!(!dedup.is_duplicate("abc123"));
        assert!(dedup.is_duplicate("abc123"));
        assert!(dedup.is_duplicate("abc123"));
    }

    #[test]
    fn repeat_after_window_is_not_duplicate() {
        let dedup = Deduplicator::new(1);
        assert!(!dedup.is_duplicate("abc123"));
        sleep(Duration::from_millis(1100));
        assert!(!dedup.is_duplicate("abc123"));
    }

    #[test]
    fn memory_bounded_to_distinct_recent_fingerprints() {
        let dedup = Deduplicator::new(1);
        for i in 0..10 {
            dedup.is_duplicate(&format!("fp-{i}"));
        }
        assert_eq!(dedup.len(), 10);
        sleep(Duration::from_millis(1100));
        dedup.is_duplicate("fp-fresh");
        assert_eq!(dedup.len(), 1);
    }
}
