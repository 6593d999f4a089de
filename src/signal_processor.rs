//! Signal Processor (C6): fans a validated signal out to every active
//! adapter in parallel and collects per-adapter outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tracing::warn;

use crate::adapters::DexAdapter;
use crate::models::{
    DexOutcome, ErrorCategory, ErrorLevel, ExecutionStatus, OverallStatus, ProcessingResponse,
    Side, SubmissionStatus,
};
use crate::store::Store;

pub struct SignalProcessor {
    adapters: Vec<Arc<dyn DexAdapter>>,
    store: Store,
    deadline: Duration,
}

impl SignalProcessor {
    pub fn new(adapters: Vec<Arc<dyn DexAdapter>>, store: Store, deadline_seconds: u64) -> Self {
        Self {
            adapters,
            store,
            deadline: Duration::from_secs(deadline_seconds),
        }
    }

    pub async fn process(
        &self,
        fingerprint: &str,
        symbol: &str,
        side: Side,
        size: Decimal,
        is_test_mode: bool,
    ) -> ProcessingResponse {
        let mut active = Vec::new();
        for adapter in &self.adapters {
            if adapter.is_connected().await {
                active.push(adapter.clone());
            }
        }

        if active.is_empty() {
            return ProcessingResponse {
                signal_fingerprint: fingerprint.to_string(),
                overall_status: OverallStatus::Failed,
                results: Vec::new(),
                total_dex_count: 0,
                successful_count: 0,
                failed_count: 0,
                total_latency_ms: 0,
                timestamp: Utc::now(),
            };
        }

        let start = Instant::now();
        let symbol = symbol.to_string();
        let active_count = active.len();

        let tasks = active.into_iter().map(|adapter| {
            let symbol = symbol.clone();
            async move {
                let task_start = Instant::now();
                match adapter.submit_order(&symbol, side, size).await {
                    Ok(result) => {
                        let latency_ms = task_start.elapsed().as_millis() as u64;
                        let status = match result.status {
                            SubmissionStatus::Rejected => ExecutionStatus::Failed,
                            _ => ExecutionStatus::Filled,
                        };
                        let error_message = None;
                        (
                            adapter.id().to_string(),
                            status,
                            Some(result.external_order_id),
                            result.filled_amount,
                            error_message,
                            latency_ms,
                            result.raw_response,
                        )
                    }
                    Err(e) => {
                        let latency_ms = task_start.elapsed().as_millis() as u64;
                        (
                            adapter.id().to_string(),
                            ExecutionStatus::Failed,
                            None,
                            Decimal::ZERO,
                            Some(e.to_string()),
                            latency_ms,
                            serde_json::json!({"error": e.to_string()}),
                        )
                    }
                }
            }
        });

        let outcomes = match tokio::time::timeout(self.deadline, join_all(tasks)).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                self.store
                    .record_error(
                        ErrorLevel::Warning,
                        ErrorCategory::ExecutionFailed,
                        "signal dispatch deadline exceeded",
                        serde_json::json!({"signal_fingerprint": fingerprint}),
                    )
                    .await;
                return ProcessingResponse {
                    signal_fingerprint: fingerprint.to_string(),
                    overall_status: OverallStatus::Failed,
                    results: Vec::new(),
                    total_dex_count: active_count,
                    successful_count: 0,
                    failed_count: active_count,
                    total_latency_ms: start.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                };
            }
        };

        let mut results = Vec::with_capacity(outcomes.len());
        let mut successful_count = 0;
        let mut failed_count = 0;

        for (adapter_id, status, external_order_id, filled_amount, error_message, latency_ms, mut raw) in outcomes
        {
            if let Some(obj) = raw.as_object_mut() {
                obj.insert("is_test_mode".to_string(), serde_json::json!(is_test_mode));
                obj.entry("remaining_amount")
                    .or_insert_with(|| serde_json::json!("0"));
            }

            match self
                .store
                .record_execution(
                    fingerprint,
                    &adapter_id,
                    external_order_id.as_deref(),
                    status,
                    raw,
                    Some(latency_ms),
                )
                .await
            {
                Ok(record) => {
                    match record.status {
                        ExecutionStatus::Filled | ExecutionStatus::Partial => successful_count += 1,
                        _ => failed_count += 1,
                    }
                    results.push(DexOutcome {
                        dex_id: adapter_id,
                        status: record.status.as_str().to_string(),
                        order_id: record.external_order_id,
                        filled_amount,
                        error_message,
                        latency_ms,
                    });
                }
                Err(e) => {
                    warn!(error = %e, adapter_id = %adapter_id, "failed to persist execution record");
                    match status {
                        ExecutionStatus::Filled | ExecutionStatus::Partial => successful_count += 1,
                        _ => failed_count += 1,
                    }
                    results.push(DexOutcome {
                        dex_id: adapter_id,
                        status: status.as_str().to_string(),
                        order_id: external_order_id,
                        filled_amount,
                        error_message,
                        latency_ms,
                    });
                }
            }
        }

        let overall_status = if failed_count == 0 {
            OverallStatus::Success
        } else if successful_count > 0 {
            OverallStatus::Partial
        } else {
            OverallStatus::Failed
        };

        ProcessingResponse {
            signal_fingerprint: fingerprint.to_string(),
            overall_status,
            total_dex_count: results.len(),
            successful_count,
            failed_count,
            results,
            total_latency_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockAdapter;
    use std::sync::Arc;

    async fn connected_mock(id: &str) -> Arc<dyn DexAdapter> {
        let adapter = Arc::new(MockAdapter::new(id));
        adapter.connect().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn no_active_adapters_yields_failed_with_zero_elapsed() {
        let store = Store::open(":memory:").unwrap();
        let processor = SignalProcessor::new(Vec::new(), store, 30);
        let response = processor
            .process("fp1", "ETH-PERP", Side::Buy, Decimal::ONE, false)
            .await;
        assert_eq!(response.overall_status, OverallStatus::Failed);
        assert_eq!(response.total_dex_count, 0);
        assert_eq!(response.total_latency_ms, 0);
    }

    #[tokio::test]
    async fn all_healthy_adapters_yield_success() {
        let store = Store::open(":memory:").unwrap();
        let adapters = vec![connected_mock("mock-A").await, connected_mock("mock-B").await];
        let processor = SignalProcessor::new(adapters, store, 30);
        let response = processor
            .process("fp2", "ETH-PERP", Side::Buy, Decimal::ONE, false)
            .await;
        assert_eq!(response.overall_status, OverallStatus::Success);
        assert_eq!(response.successful_count, 2);
        assert_eq!(response.failed_count, 0);
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn execution_rows_match_active_count() {
        let store = Store::open(":memory:").unwrap();
        let adapters = vec![connected_mock("mock-A").await, connected_mock("mock-B").await];
        let processor = SignalProcessor::new(adapters, store.clone(), 30);
        processor
            .process("fp3", "ETH-PERP", Side::Buy, Decimal::ONE, false)
            .await;
        let count = store.count_executions_for_signal("fp3").await.unwrap();
        assert_eq!(count, 2);
    }
}
