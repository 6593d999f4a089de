//! Rate Limiter (C2): per-key sliding-window request admission.
//!
//! Distinct from `middleware/rate_limit.rs`'s per-IP fixed-window-plus-burst
//! scheme (kept alongside this module purely as reference): that shape
//! doesn't bound admissions in every rolling window, which is the invariant
//! this component is required to hold. This one prunes each key's bucket on
//! every call and keeps the teacher's `parking_lot::Mutex<HashMap<..>>`
//! construction idiom.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    timestamps: VecDeque<Instant>,
}

pub struct RateLimiter {
    window: Duration,
    limit: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(window_seconds: u64, limit: u32) -> Self {
        Self {
            window: Duration::from_secs(window_seconds),
            limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, bucket: &mut Bucket, now: Instant) {
        while let Some(&oldest) = bucket.timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                bucket.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prunes `key`'s bucket, then admits the request iff fewer than `limit`
    /// timestamps remain in the window. Admitted requests are appended.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            timestamps: VecDeque::new(),
        });

        self.prune(bucket, now);

        if bucket.timestamps.len() as u32 >= self.limit {
            return false;
        }

        bucket.timestamps.push_back(now);
        true
    }

    /// Seconds until `key`'s oldest timestamp falls out of the window, 0 if
    /// the bucket is empty after pruning. Never negative.
    pub fn retry_after(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(key) else {
            return 0;
        };

        self.prune(bucket, now);

        match bucket.timestamps.front() {
            None => 0,
            Some(&oldest) => {
                let elapsed = now.duration_since(oldest);
                self.window.saturating_sub(elapsed).as_secs()
            }
        }
    }

    /// Drops keys whose buckets are entirely stale. Optional housekeeping;
    /// `is_allowed`/`retry_after` already prune lazily on every call.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| {
            self.prune(bucket, now);
            !bucket.timestamps.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(60, 3);
        assert!(limiter.is_allowed("token-a"));
        assert!(limiter.is_allowed("token-a"));
        assert!(limiter.is_allowed("token-a"));
        assert!(!limiter.is_allowed("token-a"));
    }

    #[test]
    fn independent_keys_have_independent_budgets() {
        let limiter = RateLimiter::new(60, 1);
        assert!(limiter.is_allowed("token-a"));
        assert!(limiter.is_allowed("token-b"));
        assert!(!limiter.is_allowed("token-a"));
    }

    #[test]
    fn admits_again_once_oldest_timestamp_ages_out() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.is_allowed("token-a"));
        assert!(!limiter.is_allowed("token-a"));
        sleep(Duration::from_millis(1100));
        assert!(limiter.is_allowed("token-a"));
    }

    #[test]
    fn retry_after_is_zero_when_not_rate_limited() {
        let limiter = RateLimiter::new(60, 10);
        assert_eq!(limiter.retry_after("token-a"), 0);
    }

    #[test]
    fn retry_after_is_bounded_by_window() {
        let limiter = RateLimiter::new(60, 1);
        limiter.is_allowed("token-a");
        let retry = limiter.retry_after("token-a");
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn cleanup_drops_fully_stale_keys() {
        let limiter = RateLimiter::new(1, 5);
        limiter.is_allowed("token-a");
        sleep(Duration::from_millis(1100));
        limiter.cleanup();
        assert_eq!(limiter.buckets.lock().len(), 0);
    }
}
