//! Network-free mock DEX adapter used in testing and for dry-run dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;

use crate::adapters::{now, DexAdapter, DexError, UpdateSink};
use crate::models::{
    HealthSample, HealthState, OrderStatus, Position, Side, SubmissionResult, SubmissionStatus,
};

/// Network-free mock DEX, suitable for development, tests, and test-mode
/// dispatch. Always succeeds unless constructed with
/// [`MockAdapter::new_failing`], in which case every `submit_order` call
/// returns a retryable `ConnectionError` while the adapter otherwise stays
/// connected — used to exercise per-adapter isolation (one failing adapter
/// must not affect the others' outcomes).
pub struct MockAdapter {
    id: String,
    connected: RwLock<bool>,
    order_counter: AtomicU64,
    fail_submissions: AtomicBool,
    submit_delay_ms: AtomicU64,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: RwLock::new(false),
            order_counter: AtomicU64::new(0),
            fail_submissions: AtomicBool::new(false),
            submit_delay_ms: AtomicU64::new(0),
        }
    }

    /// A mock adapter that stays connected but fails every `submit_order`
    /// call with a retryable connection error.
    pub fn new_failing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: RwLock::new(false),
            order_counter: AtomicU64::new(0),
            fail_submissions: AtomicBool::new(true),
            submit_delay_ms: AtomicU64::new(0),
        }
    }

    /// Sleeps `delay_ms` inside every `submit_order` call before responding,
    /// to exercise in-flight tracking during a slow dispatch.
    pub fn with_submit_delay(self, delay_ms: u64) -> Self {
        self.submit_delay_ms.store(delay_ms, Ordering::SeqCst);
        self
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl DexAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> Result<(), DexError> {
        *self.connected.write() = true;
        info!(dex_id = %self.id, "connected to mock dex");
        Ok(())
    }

    async fn disconnect(&self) {
        *self.connected.write() = false;
        info!(dex_id = %self.id, "disconnected from mock dex");
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> Result<SubmissionResult, DexError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(DexError::Connection(format!("{} is unreachable", self.id)));
        }

        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        let n = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("mock-order-{n:06}");

        info!(
            dex_id = %self.id,
            order_id = %order_id,
            symbol = %symbol,
            side = side.as_str(),
            size = %size,
            "mock order submitted"
        );

        Ok(SubmissionResult {
            external_order_id: order_id.clone(),
            status: SubmissionStatus::Submitted,
            submitted_at: now(),
            // No fill yet; a real venue would report fills via order updates.
            filled_amount: Decimal::ZERO,
            raw_response: serde_json::json!({
                "order_id": order_id,
                "status": "submitted",
                "symbol": symbol,
                "side": side.as_str(),
                "size": size.to_string(),
            }),
        })
    }

    async fn order_status(&self, _external_order_id: &str) -> Result<OrderStatus, DexError> {
        Ok(OrderStatus::Filled)
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<(), DexError> {
        info!(dex_id = %self.id, order_id = %external_order_id, "mock order cancelled");
        Ok(())
    }

    async fn position(&self, _symbol: &str) -> Result<Option<Position>, DexError> {
        Ok(None)
    }

    async fn health_probe(&self) -> HealthSample {
        let connected = *self.connected.read();
        HealthSample {
            status: if connected {
                HealthState::Healthy
            } else {
                HealthState::Offline
            },
            latency_ms: 1,
            observed_at: now(),
            error_message: None,
        }
    }

    async fn subscribe_updates(&self, _sink: Arc<dyn UpdateSink>) {}
}
