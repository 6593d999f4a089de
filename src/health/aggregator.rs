//! Health Aggregator (C7): synchronous composite view used by the public
//! health endpoint. Unlike the Health Monitor (C8), this component is only
//! ever consulted on demand, never drives reconnection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::adapters::DexAdapter;
use crate::models::{HealthSample, HealthState};

const ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct DexHealthView {
    pub status: HealthState,
    pub latency_ms: Option<u64>,
    pub error_count: u32,
    pub error_message: Option<String>,
    pub last_successful: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthState,
    pub test_mode: bool,
    pub uptime_seconds: u64,
    pub dex_status: HashMap<String, DexHealthView>,
    pub timestamp: DateTime<Utc>,
}

struct ErrorTracker {
    failures: Vec<Instant>,
    last_successful: Option<DateTime<Utc>>,
}

pub struct HealthAggregator {
    adapters: Vec<Arc<dyn DexAdapter>>,
    test_mode: bool,
    started_at: Instant,
    errors: Mutex<HashMap<String, ErrorTracker>>,
}

impl HealthAggregator {
    pub fn new(adapters: Vec<Arc<dyn DexAdapter>>, test_mode: bool) -> Self {
        Self {
            adapters,
            test_mode,
            started_at: Instant::now(),
            errors: Mutex::new(HashMap::new()),
        }
    }

    fn record_failure(&self, dex_id: &str) {
        let mut errors = self.errors.lock();
        let tracker = errors.entry(dex_id.to_string()).or_insert_with(|| ErrorTracker {
            failures: Vec::new(),
            last_successful: None,
        });
        let now = Instant::now();
        tracker.failures.retain(|&t| now.duration_since(t) < ERROR_WINDOW);
        tracker.failures.push(now);
    }

    fn record_success(&self, dex_id: &str) {
        let mut errors = self.errors.lock();
        let tracker = errors.entry(dex_id.to_string()).or_insert_with(|| ErrorTracker {
            failures: Vec::new(),
            last_successful: None,
        });
        tracker.failures.clear();
        tracker.last_successful = Some(Utc::now());
    }

    fn error_count(&self, dex_id: &str) -> u32 {
        let mut errors = self.errors.lock();
        let Some(tracker) = errors.get_mut(dex_id) else {
            return 0;
        };
        let now = Instant::now();
        tracker.failures.retain(|&t| now.duration_since(t) < ERROR_WINDOW);
        tracker.failures.len() as u32
    }

    fn last_successful(&self, dex_id: &str) -> Option<DateTime<Utc>> {
        self.errors.lock().get(dex_id).and_then(|t| t.last_successful)
    }

    /// Queries every adapter's `health_probe` in parallel; a probe that
    /// panics or otherwise fails to report is treated as an `offline`
    /// sample, not surfaced as an error to the caller.
    pub async fn get_system_health(&self) -> SystemHealth {
        let mut dex_status = HashMap::new();

        if !self.adapters.is_empty() {
            let probes = self.adapters.iter().map(|adapter| {
                let adapter = adapter.clone();
                async move { (adapter.id().to_string(), adapter.health_probe().await) }
            });
            let samples: Vec<(String, HealthSample)> = join_all(probes).await;

            for (dex_id, sample) in samples {
                match sample.status {
                    HealthState::Healthy => {
                        self.record_success(&dex_id);
                    }
                    _ => {
                        self.record_failure(&dex_id);
                        if let Some(ref msg) = sample.error_message {
                            warn!(dex_id = %dex_id, error = %msg, "health probe reported unhealthy status");
                        }
                    }
                }

                dex_status.insert(
                    dex_id.clone(),
                    DexHealthView {
                        status: sample.status,
                        latency_ms: Some(sample.latency_ms),
                        error_count: self.error_count(&dex_id),
                        error_message: sample.error_message,
                        last_successful: self.last_successful(&dex_id),
                    },
                );
            }
        }

        let status = aggregate(&dex_status);

        SystemHealth {
            status,
            test_mode: self.test_mode,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dex_status,
            timestamp: Utc::now(),
        }
    }
}

/// all healthy -> healthy; all offline -> offline; empty -> healthy;
/// otherwise -> degraded. Error counts are exposed but never drive this
/// decision.
fn aggregate(dex_status: &HashMap<String, DexHealthView>) -> HealthState {
    if dex_status.is_empty() {
        return HealthState::Healthy;
    }
    let all_healthy = dex_status.values().all(|v| v.status == HealthState::Healthy);
    if all_healthy {
        return HealthState::Healthy;
    }
    let all_offline = dex_status.values().all(|v| v.status == HealthState::Offline);
    if all_offline {
        return HealthState::Offline;
    }
    HealthState::Degraded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockAdapter;
    use std::sync::Arc;

    async fn adapter(id: &str, connected: bool) -> Arc<dyn DexAdapter> {
        let a = Arc::new(MockAdapter::new(id));
        if connected {
            a.connect().await.unwrap();
        }
        a
    }

    #[tokio::test]
    async fn empty_adapter_list_is_healthy() {
        let aggregator = HealthAggregator::new(Vec::new(), false);
        let health = aggregator.get_system_health().await;
        assert_eq!(health.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn all_healthy_is_healthy() {
        let adapters = vec![adapter("A", true).await, adapter("B", true).await];
        let aggregator = HealthAggregator::new(adapters, false);
        let health = aggregator.get_system_health().await;
        assert_eq!(health.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn all_offline_is_offline() {
        let adapters = vec![adapter("A", false).await, adapter("B", false).await];
        let aggregator = HealthAggregator::new(adapters, false);
        let health = aggregator.get_system_health().await;
        assert_eq!(health.status, HealthState::Offline);
    }

    #[tokio::test]
    async fn mixed_is_degraded() {
        let adapters = vec![adapter("A", true).await, adapter("B", false).await];
        let aggregator = HealthAggregator::new(adapters, false);
        let health = aggregator.get_system_health().await;
        assert_eq!(health.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn error_count_resets_on_success() {
        let adapters = vec![adapter("A", false).await];
        let aggregator = HealthAggregator::new(adapters.clone(), false);
        aggregator.get_system_health().await;
        assert_eq!(aggregator.error_count("A"), 1);

        adapters[0].connect().await.unwrap();
        aggregator.get_system_health().await;
        assert_eq!(aggregator.error_count("A"), 0);
    }
}
