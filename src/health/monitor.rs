//! Health Monitor (C8): background scheduler that polls adapters, drives
//! state transitions, and initiates reconnection. Never called from the
//! request path. Loop shape mirrors `route_quality/prober.rs::run()`:
//! `tokio::select!` over interval ticks inside a loop that must never die.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::adapters::DexAdapter;
use crate::models::{ErrorCategory, ErrorLevel, HealthState};
use crate::store::Store;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
struct AdapterRuntimeState {
    consecutive_failures: u32,
    current_status: HealthState,
    reconnecting: bool,
}

impl Default for AdapterRuntimeState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            current_status: HealthState::Healthy,
            reconnecting: false,
        }
    }
}

pub struct HealthMonitor {
    adapters: Vec<Arc<dyn DexAdapter>>,
    store: Store,
    poll_interval: Duration,
    max_failures: u32,
    state: Arc<Mutex<HashMap<String, AdapterRuntimeState>>>,
}

impl HealthMonitor {
    pub fn new(
        adapters: Vec<Arc<dyn DexAdapter>>,
        store: Store,
        poll_interval_seconds: u64,
        max_failures: u32,
    ) -> Self {
        let mut state = HashMap::new();
        for adapter in &adapters {
            state.insert(adapter.id().to_string(), AdapterRuntimeState::default());
        }
        Self {
            adapters,
            store,
            poll_interval: Duration::from_secs(poll_interval_seconds),
            max_failures,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Spawns the background loop and returns its handle so `main` can hold
    /// it for the process lifetime (it is never awaited to completion).
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            // The cycle itself must never bring down the scheduler: any
            // panic inside a single adapter's check is isolated by the
            // per-adapter spawn below, and `run_cycle` itself has no
            // fallible exit.
            self.run_cycle().await;
        }
    }

    async fn run_cycle(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let should_skip = {
                let state = self.state.lock();
                state.get(adapter.id()).map(|s| s.reconnecting).unwrap_or(false)
            };
            if should_skip {
                continue;
            }

            let monitor = self.clone();
            let adapter = adapter.clone();
            handles.push(tokio::spawn(async move {
                monitor.check_adapter(adapter).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "health monitor cycle task panicked");
            }
        }
    }

    async fn check_adapter(self: &Arc<Self>, adapter: Arc<dyn DexAdapter>) {
        let id = adapter.id().to_string();
        let probe = tokio::time::timeout(PROBE_TIMEOUT, adapter.health_probe()).await;

        let healthy = match &probe {
            Ok(sample) => sample.status == HealthState::Healthy,
            Err(_) => false,
        };

        if healthy {
            let previous = {
                let mut state = self.state.lock();
                let entry = state.entry(id.clone()).or_default();
                let previous = entry.current_status;
                entry.consecutive_failures = 0;
                entry.current_status = HealthState::Healthy;
                previous
            };
            if matches!(previous, HealthState::Degraded | HealthState::Offline) {
                info!(dex_id = %id, "adapter recovered, now healthy");
            }
            return;
        }

        let error_message = match probe {
            Ok(sample) => sample.error_message.unwrap_or_else(|| "unhealthy".to_string()),
            Err(_) => "health probe timed out".to_string(),
        };

        let (new_status, changed) = {
            let mut state = self.state.lock();
            let entry = state.entry(id.clone()).or_default();
            entry.consecutive_failures += 1;
            let previous = entry.current_status;
            entry.current_status = if entry.consecutive_failures >= self.max_failures {
                HealthState::Offline
            } else {
                HealthState::Degraded
            };
            (entry.current_status, entry.current_status != previous)
        };

        if changed {
            warn!(dex_id = %id, status = new_status.as_str(), "adapter health transitioned");
        }

        self.store
            .record_error(
                ErrorLevel::Warning,
                ErrorCategory::HealthCheckFailed,
                &error_message,
                serde_json::json!({"dex_id": id}),
            )
            .await;

        // Reconnection begins only on transition to offline, never on the
        // first degraded observation.
        if changed && new_status == HealthState::Offline {
            let monitor = self.clone();
            let adapter = adapter.clone();
            tokio::spawn(async move {
                monitor.reconnect(adapter).await;
            });
        }
    }

    async fn reconnect(self: Arc<Self>, adapter: Arc<dyn DexAdapter>) {
        let id = adapter.id().to_string();
        {
            let mut state = self.state.lock();
            state.entry(id.clone()).or_default().reconnecting = true;
        }

        let mut attempt: u32 = 0;
        let mut succeeded = false;

        while attempt < RECONNECT_MAX_ATTEMPTS {
            adapter.disconnect().await;
            let connect_result = adapter.connect().await;
            let verified = if connect_result.is_ok() {
                adapter.health_probe().await.status == HealthState::Healthy
            } else {
                false
            };

            if verified {
                succeeded = true;
                break;
            }

            attempt += 1;
            let backoff = backoff_duration(attempt);
            tokio::time::sleep(backoff).await;
        }

        if succeeded {
            let mut state = self.state.lock();
            let entry = state.entry(id.clone()).or_default();
            entry.reconnecting = false;
            entry.consecutive_failures = 0;
            entry.current_status = HealthState::Healthy;
            info!(dex_id = %id, attempts = attempt, "reconnection succeeded");
        } else {
            let mut state = self.state.lock();
            state.entry(id.clone()).or_default().reconnecting = false;
            self.store
                .record_error(
                    ErrorLevel::Error,
                    ErrorCategory::DexConnectionFailed,
                    "reconnection exhausted all attempts",
                    serde_json::json!({"dex_id": id, "attempts": attempt}),
                )
                .await;
        }
    }
}

/// `min(base * 2^(attempt-1), cap) * jitter`, `jitter ∈ [0.8, 1.2]` uniform.
fn backoff_duration(attempt: u32) -> Duration {
    let exp = RECONNECT_BASE.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    let capped = exp.min(RECONNECT_CAP);
    let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_capped_exponential_sequence() {
        let expected_base = [1u64, 2, 4, 8, 16, 30, 30, 30];
        for (i, &base) in expected_base.iter().enumerate() {
            let attempt = (i + 1) as u32;
            let duration = backoff_duration(attempt);
            let secs = duration.as_secs_f64();
            // jitter is +/-20%; compare against the un-jittered base.
            assert!(
                secs >= base as f64 * 0.8 - 0.01 && secs <= base as f64 * 1.2 + 0.01,
                "attempt {attempt}: expected ~{base}s, got {secs}s"
            );
        }
    }
}
