//! Domain model for the signal-ingress/DEX-dispatch pipeline.
//!
//! Mirrors the persisted schema in `store.rs` field-for-field: every type
//! here either crosses the HTTP boundary, the SQLite boundary, or both.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// The validated `{symbol, side, size}` triple carried by a webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
}

/// A received, persisted webhook signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub fingerprint: String,
    pub payload: SignalPayload,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Filled,
    Partial,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Filled => "filled",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "filled" => Some(ExecutionStatus::Filled),
            "partial" => Some(ExecutionStatus::Partial),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// One (signal, adapter) dispatch attempt, persisted append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub signal_fingerprint: String,
    pub adapter_id: String,
    pub external_order_id: Option<String>,
    pub status: ExecutionStatus,
    pub result_blob: serde_json::Value,
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Error,
    Warning,
}

/// Stable enumerated error codes, not type names. Used both in the HTTP
/// error envelope and the persisted error log's `category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidSignal,
    InvalidToken,
    RateLimited,
    ServiceUnavailable,
    DexTimeout,
    DexConnectionFailed,
    DexRejected,
    InsufficientFunds,
    NonceError,
    OrderNotFound,
    DexSignatureError,
    ExecutionFailed,
    PartialFill,
    HealthCheckFailed,
    AlertSendFailed,
    DatabaseError,
    ConfigurationError,
}

impl ErrorCategory {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidSignal => "INVALID_SIGNAL",
            ErrorCategory::InvalidToken => "INVALID_TOKEN",
            ErrorCategory::RateLimited => "RATE_LIMITED",
            ErrorCategory::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCategory::DexTimeout => "DEX_TIMEOUT",
            ErrorCategory::DexConnectionFailed => "DEX_CONNECTION_FAILED",
            ErrorCategory::DexRejected => "DEX_REJECTED",
            ErrorCategory::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCategory::NonceError => "NONCE_ERROR",
            ErrorCategory::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCategory::DexSignatureError => "DEX_SIGNATURE_ERROR",
            ErrorCategory::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCategory::PartialFill => "PARTIAL_FILL",
            ErrorCategory::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            ErrorCategory::AlertSendFailed => "ALERT_SEND_FAILED",
            ErrorCategory::DatabaseError => "DATABASE_ERROR",
            ErrorCategory::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "INVALID_SIGNAL" => ErrorCategory::InvalidSignal,
            "INVALID_TOKEN" => ErrorCategory::InvalidToken,
            "RATE_LIMITED" => ErrorCategory::RateLimited,
            "SERVICE_UNAVAILABLE" => ErrorCategory::ServiceUnavailable,
            "DEX_TIMEOUT" => ErrorCategory::DexTimeout,
            "DEX_CONNECTION_FAILED" => ErrorCategory::DexConnectionFailed,
            "DEX_REJECTED" => ErrorCategory::DexRejected,
            "INSUFFICIENT_FUNDS" => ErrorCategory::InsufficientFunds,
            "NONCE_ERROR" => ErrorCategory::NonceError,
            "ORDER_NOT_FOUND" => ErrorCategory::OrderNotFound,
            "DEX_SIGNATURE_ERROR" => ErrorCategory::DexSignatureError,
            "EXECUTION_FAILED" => ErrorCategory::ExecutionFailed,
            "PARTIAL_FILL" => ErrorCategory::PartialFill,
            "HEALTH_CHECK_FAILED" => ErrorCategory::HealthCheckFailed,
            "ALERT_SEND_FAILED" => ErrorCategory::AlertSendFailed,
            "DATABASE_ERROR" => ErrorCategory::DatabaseError,
            "CONFIGURATION_ERROR" => ErrorCategory::ConfigurationError,
            _ => return None,
        })
    }
}

impl Serialize for ErrorCategory {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ErrorCategory::from_code(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error category: {s}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub level: ErrorLevel,
    pub category: ErrorCategory,
    pub message: String,
    pub context_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single adapter's `submit_order` call, before persistence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Filled,
    Partial,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub external_order_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub filled_amount: Decimal,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Partial,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Offline,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub status: HealthState,
    pub latency_ms: u64,
    pub observed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// A single order-update pushed through `subscribe_updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub external_order_id: String,
    pub status: OrderStatus,
    pub filled_amount: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Per-adapter dispatch outcome as surfaced in the HTTP response, mirrors
/// the `results[]` entries of the webhook response. Distinct from
/// `ExecutionRecord`, which is the persisted view assigned after
/// `record_execution` coerces `partial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexOutcome {
    pub dex_id: String,
    pub status: String,
    pub order_id: Option<String>,
    pub filled_amount: Decimal,
    pub error_message: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

/// Response of `SignalProcessor::process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResponse {
    #[serde(rename = "signal_id")]
    pub signal_fingerprint: String,
    pub overall_status: OverallStatus,
    pub results: Vec<DexOutcome>,
    pub total_dex_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub total_latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}
