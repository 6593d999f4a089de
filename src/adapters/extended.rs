//! Real DEX integration adapter.
//!
//! Speaks to a generic REST order-submission API over HTTPS, authenticating
//! every request with an HMAC-SHA256 signature the way `vault/execution.rs`
//! signs Polymarket CLOB requests (same `Hmac<Sha256>` construction, same
//! "method + path + body + timestamp" message format). Maintains a
//! persistent WebSocket connection with a heartbeat task while connected,
//! for `subscribe_updates`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use parking_lot::Mutex as PLMutex;
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::adapters::{now, DexAdapter, DexError, RejectionKind, UpdateSink};
use crate::models::{
    HealthSample, HealthState, OrderStatus, Position, Side, SubmissionResult, SubmissionStatus,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ExtendedConfig {
    pub id: String,
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout: Duration,
}

impl ExtendedConfig {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            id: "extended".to_string(),
            base_url: "https://api.extended.exchange".to_string(),
            ws_url: "wss://api.extended.exchange/stream".to_string(),
            api_key: settings.extended_api_key.clone(),
            api_secret: settings.extended_api_secret.clone(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ExtendedAdapter {
    config: ExtendedConfig,
    client: Client,
    connected: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    last_error: PLMutex<Option<String>>,
}

impl ExtendedAdapter {
    pub fn new(config: ExtendedConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("extended adapter http client");
        Self {
            config,
            client,
            connected: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
            last_error: PLMutex::new(None),
        }
    }

    /// HMAC-SHA256 over `method:path:body:timestamp`, hex-encoded. Mirrors
    /// `vault/execution.rs::sign_request`'s message format and MAC
    /// construction, swapped to hex since Extended's API expects a hex
    /// signature header rather than Polymarket's URL-safe base64 one.
    fn sign_request(&self, method: &str, path: &str, body: &str, timestamp: i64) -> Result<String, DexError> {
        let message = format!("{method}:{path}:{body}:{timestamp}");
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| DexError::Signature(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>, DexError> {
        let timestamp = Utc::now().timestamp();
        let signature = self.sign_request(method, path, body, timestamp)?;
        Ok(vec![
            ("X-API-KEY".to_string(), self.config.api_key.clone()),
            ("X-SIGNATURE".to_string(), signature),
            ("X-TIMESTAMP".to_string(), timestamp.to_string()),
        ])
    }

    fn map_rejection(status: &str) -> Option<RejectionKind> {
        match status {
            "insufficient_funds" => Some(RejectionKind::InsufficientFunds),
            "nonce_error" => Some(RejectionKind::NonceError),
            "order_not_found" => Some(RejectionKind::OrderNotFound),
            _ => None,
        }
    }
}

#[async_trait]
impl DexAdapter for ExtendedAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn connect(&self) -> Result<(), DexError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let headers = self.auth_headers("GET", "/v1/session", "")?;
        let mut req = self.client.get(format!("{}/v1/session", self.config.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DexError::Connection(format!(
                "handshake rejected with status {}",
                resp.status()
            )));
        }

        let (ws_stream, _) = connect_async(&self.config.ws_url)
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(15));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if write.send(Message::Ping(vec![])).await.is_err() {
                            break;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(_)) => {}
                            _ => break,
                        }
                    }
                }
            }
        });

        *self.heartbeat.lock().await = Some(handle);
        self.connected.store(true, Ordering::SeqCst);
        info!(dex_id = %self.config.id, "connected to extended dex");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(dex_id = %self.config.id, "disconnected from extended dex");
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> Result<SubmissionResult, DexError> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side.as_str(),
            "size": size.to_string(),
        })
        .to_string();
        let headers = self.auth_headers("POST", "/v1/orders", &body)?;

        let mut req = self
            .client
            .post(format!("{}/v1/orders", self.config.base_url))
            .header("content-type", "application/json")
            .body(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                DexError::Timeout
            } else {
                DexError::Connection(e.to_string())
            }
        })?;

        let status_code = resp.status();
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;

        if !status_code.is_success() {
            let reason = raw
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("rejected");
            let kind = Self::map_rejection(reason).unwrap_or(RejectionKind::OrderNotFound);
            return Err(DexError::Rejection {
                kind,
                message: reason.to_string(),
            });
        }

        let order_id = raw
            .get("order_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let filled_amount = raw
            .get("filled_amount")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);

        Ok(SubmissionResult {
            external_order_id: order_id,
            status: SubmissionStatus::Submitted,
            submitted_at: now(),
            filled_amount,
            raw_response: raw,
        })
    }

    async fn order_status(&self, external_order_id: &str) -> Result<OrderStatus, DexError> {
        let path = format!("/v1/orders/{external_order_id}");
        let headers = self.auth_headers("GET", &path, "")?;
        let mut req = self.client.get(format!("{}{}", self.config.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DexError::Rejection {
                kind: RejectionKind::OrderNotFound,
                message: "order not found".to_string(),
            });
        }
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        let status = match raw.get("status").and_then(|v| v.as_str()) {
            Some("open") => OrderStatus::Open,
            Some("filled") => OrderStatus::Filled,
            Some("partial") => OrderStatus::Partial,
            Some("cancelled") => OrderStatus::Cancelled,
            _ => OrderStatus::Unknown,
        };
        Ok(status)
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<(), DexError> {
        let path = format!("/v1/orders/{external_order_id}");
        let headers = self.auth_headers("DELETE", &path, "")?;
        let mut req = self
            .client
            .delete(format!("{}{}", self.config.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DexError::Rejection {
                kind: RejectionKind::OrderNotFound,
                message: format!("cancel rejected with status {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, DexError> {
        let path = format!("/v1/positions/{symbol}");
        let headers = self.auth_headers("GET", &path, "")?;
        let mut req = self.client.get(format!("{}{}", self.config.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DexError::Connection(e.to_string()))?;
        let size = raw
            .get("size")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let entry_price = raw
            .get("entry_price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok());
        Ok(Some(Position {
            symbol: symbol.to_string(),
            size,
            entry_price,
        }))
    }

    async fn health_probe(&self) -> HealthSample {
        let start = std::time::Instant::now();
        let path = "/v1/ping";
        let headers = match self.auth_headers("GET", path, "") {
            Ok(h) => h,
            Err(e) => {
                return HealthSample {
                    status: HealthState::Offline,
                    latency_ms: 0,
                    observed_at: now(),
                    error_message: Some(e.to_string()),
                }
            }
        };
        let mut req = self.client.get(format!("{}{}", self.config.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                *self.last_error.lock() = None;
                HealthSample {
                    status: HealthState::Healthy,
                    latency_ms: start.elapsed().as_millis() as u64,
                    observed_at: now(),
                    error_message: None,
                }
            }
            Ok(resp) => {
                let message = format!("ping returned status {}", resp.status());
                *self.last_error.lock() = Some(message.clone());
                HealthSample {
                    status: HealthState::Degraded,
                    latency_ms: start.elapsed().as_millis() as u64,
                    observed_at: now(),
                    error_message: Some(message),
                }
            }
            Err(e) => {
                let message = e.to_string();
                *self.last_error.lock() = Some(message.clone());
                HealthSample {
                    status: HealthState::Offline,
                    latency_ms: start.elapsed().as_millis() as u64,
                    observed_at: now(),
                    error_message: Some(message),
                }
            }
        }
    }

    async fn subscribe_updates(&self, sink: Arc<dyn UpdateSink>) {
        debug!(dex_id = %self.config.id, "subscribe_updates scope entered");
        let _ = sink;
        // The heartbeat task already owns the live WebSocket read half and
        // forwards raw frames; wiring `OrderUpdate` decoding onto `sink`
        // requires sharing that read half, which connect() currently moves
        // into the heartbeat task wholesale. Left as a no-op scope until
        // the two are split.
        warn!(dex_id = %self.config.id, "subscribe_updates is not yet wired to live order updates");
    }
}
