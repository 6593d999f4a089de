//! DEX Adapter (C3): the uniform contract every exchange integration
//! satisfies, plus the two implementations this service ships with.

pub mod extended;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{HealthSample, OrderStatus, Position, Side, SubmissionResult};

/// Non-retryable rejection subtypes, mirroring the exception hierarchy this
/// service's adapters used to throw one class per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    InsufficientFunds,
    NonceError,
    OrderNotFound,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            RejectionKind::NonceError => "NONCE_ERROR",
            RejectionKind::OrderNotFound => "ORDER_NOT_FOUND",
        }
    }
}

/// Retryability is a property of the variant, not of the call site:
/// `Timeout`, `Connection`, and `Signature` are retryable (the health
/// monitor's reconnection loop is the retry policy); `Rejection` is not.
#[derive(Debug, Error)]
pub enum DexError {
    #[error("dex adapter timed out")]
    Timeout,
    #[error("dex adapter connection failed: {0}")]
    Connection(String),
    #[error("dex adapter signature error: {0}")]
    Signature(String),
    #[error("dex adapter rejected order: {kind:?} ({message})")]
    Rejection { kind: RejectionKind, message: String },
}

impl DexError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DexError::Rejection { .. })
    }
}

/// Sink an adapter pushes `OrderUpdate`s into while a `subscribe_updates`
/// scope is active. A trait rather than a bare channel so adapters can be
/// tested against a recording sink without pulling tokio channels into the
/// contract itself.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn push(&self, update: crate::models::OrderUpdate);
}

#[async_trait]
pub trait DexAdapter: Send + Sync {
    /// Stable identifier, e.g. `mock` or `extended`.
    fn id(&self) -> &str;

    /// Establishes an authenticated session and any persistent streams.
    /// Idempotent against repeated calls on an already-connected adapter.
    async fn connect(&self) -> Result<(), DexError>;

    /// Idempotent; closes streams and cancels background tasks. Must
    /// release all resources even if called during a failed connect.
    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    async fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> Result<SubmissionResult, DexError>;

    async fn order_status(&self, external_order_id: &str) -> Result<OrderStatus, DexError>;

    async fn cancel_order(&self, external_order_id: &str) -> Result<(), DexError>;

    async fn position(&self, symbol: &str) -> Result<Option<Position>, DexError>;

    /// Must complete within the caller's declared timeout; the contract
    /// itself doesn't enforce one.
    async fn health_probe(&self) -> HealthSample;

    /// Optional capability. Default is a no-op scope: it returns
    /// immediately without ever calling the sink.
    async fn subscribe_updates(&self, _sink: std::sync::Arc<dyn UpdateSink>) {}
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
