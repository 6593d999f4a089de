//! Ingress Controller (C10): `POST /webhook`.
//!
//! Step order is normative per this service's signal-ingress contract:
//! shutdown check -> authenticate -> parse/validate -> fingerprint ->
//! deduplicate -> rate-limit -> persist -> track in-flight -> dispatch ->
//! respond. Grounded on
//! `original_source/src/kitkat/api/webhook.py::webhook_handler`, re-expressed
//! as an axum extractor chain instead of FastAPI `Depends`.

use std::str::FromStr;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::models::{ErrorCategory, ErrorLevel, ProcessingResponse, Side, Signal, SignalPayload};
use crate::AppState;

const SYSTEM_TOKEN_HEADER: &str = "x-webhook-token";

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// Raw wire shape before validation: `size` may arrive as a JSON number or
/// a numeric string, and string fields are trimmed during validation, not
/// at the deserialization boundary.
#[derive(Debug, Deserialize)]
pub struct RawSignalBody {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub size: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: &'static str,
    pub signal_id: Option<String>,
    pub dex: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

fn error_response(
    status: StatusCode,
    category: ErrorCategory,
    message: impl Into<String>,
    signal_id: Option<String>,
) -> axum::response::Response {
    let body = ErrorEnvelope {
        error: message.into(),
        code: category.code(),
        signal_id,
        dex: None,
        timestamp: Utc::now(),
    };
    (status, Json(body)).into_response()
}

/// Constant-time string comparison via `hmac::Mac::verify_slice`'s
/// constant-time tag comparison, reused directly instead of adding a
/// dedicated `subtle` dependency for one call site. The HMAC key is fixed
/// and has no secrecy role here; only the verification's timing-safe
/// comparison is being borrowed.
fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;
    const FIXED_KEY: &[u8] = b"dex-signal-router-token-compare";

    let Ok(mut tag_mac) = HmacSha256::new_from_slice(FIXED_KEY) else {
        return false;
    };
    tag_mac.update(expected.as_bytes());
    let expected_tag = tag_mac.finalize().into_bytes();

    let Ok(mut verify_mac) = HmacSha256::new_from_slice(FIXED_KEY) else {
        return false;
    };
    verify_mac.update(candidate.as_bytes());
    verify_mac.verify_slice(&expected_tag).is_ok()
}

fn validate_payload(raw: RawSignalBody) -> Result<SignalPayload, String> {
    let symbol = raw
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("symbol must be a non-empty string")?
        .to_string();

    let side = match raw.side.as_deref().map(str::trim).map(str::to_lowercase).as_deref() {
        Some("buy") => Side::Buy,
        Some("sell") => Side::Sell,
        _ => return Err("side must be \"buy\" or \"sell\"".to_string()),
    };

    let size_value = raw.size.ok_or("size is required")?;
    let size = match size_value {
        serde_json::Value::Number(n) => {
            Decimal::from_str(&n.to_string()).map_err(|_| "size is not a valid number".to_string())?
        }
        serde_json::Value::String(s) => {
            Decimal::from_str(s.trim()).map_err(|_| "size is not a valid number".to_string())?
        }
        _ => return Err("size must be a number or numeric string".to_string()),
    };

    if size <= Decimal::ZERO {
        return Err("size must be positive".to_string());
    }

    Ok(SignalPayload { symbol, side, size })
}

/// `POST /webhook`. Order of operations is normative; see module docs.
pub async fn webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    // 1. Reject if shutting down, before touching the dedup/rate-limit/store.
    if state.shutdown.is_draining() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::ServiceUnavailable,
            "service is shutting down",
            None,
        );
    }

    // 2. Authenticate: query token (user webhook) preferred, else the fixed
    // system header. Compared in constant time either way.
    let token = match query.token.clone() {
        Some(t) if !t.is_empty() => t,
        _ => headers
            .get(SYSTEM_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };

    if token.is_empty() || !constant_time_eq(&token, &state.settings.webhook_token) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCategory::InvalidToken,
            "invalid or missing webhook token",
            None,
        );
    }

    // 3. Parse & validate.
    let raw: RawSignalBody = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let body_str = String::from_utf8_lossy(&body).to_string();
            state
                .store
                .record_error(
                    ErrorLevel::Warning,
                    ErrorCategory::InvalidSignal,
                    &format!("malformed webhook body: {e}"),
                    json!({"body": crate::logging::truncate_body(&crate::logging::redact_secrets(&body_str))}),
                )
                .await;
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCategory::InvalidSignal,
                "request body is not a valid signal payload",
                None,
            );
        }
    };

    let payload = match validate_payload(raw) {
        Ok(p) => p,
        Err(reason) => {
            let body_str = String::from_utf8_lossy(&body).to_string();
            state
                .store
                .record_error(
                    ErrorLevel::Warning,
                    ErrorCategory::InvalidSignal,
                    &reason,
                    json!({"body": crate::logging::truncate_body(&crate::logging::redact_secrets(&body_str))}),
                )
                .await;
            return error_response(StatusCode::BAD_REQUEST, ErrorCategory::InvalidSignal, reason, None);
        }
    };

    // 4. Fingerprint.
    let received_at = Utc::now();
    let fingerprint = crate::fingerprint::compute(&payload, received_at);

    // 5. Deduplicate. Idempotent echo; no rate budget consumed, no re-persist.
    if state.dedup.is_duplicate(&fingerprint) {
        info!(signal_id = %fingerprint, "duplicate signal, returning idempotent echo");
        let response = ProcessingResponse {
            signal_fingerprint: fingerprint,
            overall_status: crate::models::OverallStatus::Success,
            results: Vec::new(),
            total_dex_count: 0,
            successful_count: 0,
            failed_count: 0,
            total_latency_ms: 0,
            timestamp: Utc::now(),
        };
        return Json(response).into_response();
    }

    // 6. Rate limit.
    if !state.rate_limiter.is_allowed(&token) {
        let retry_after = state.rate_limiter.retry_after(&token);
        warn!(signal_id = %fingerprint, retry_after, "rate limited");
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::RateLimited,
            "rate limit exceeded",
            Some(fingerprint),
        );
        response
            .headers_mut()
            .insert("Retry-After", retry_after.to_string().parse().unwrap());
        return response;
    }

    // 7. Persist signal.
    let signal = Signal {
        fingerprint: fingerprint.clone(),
        payload: payload.clone(),
        received_at,
        processed: false,
    };
    if let Err(e) = state.store.record_signal(&signal).await {
        state
            .store
            .record_error(
                ErrorLevel::Error,
                ErrorCategory::DatabaseError,
                &format!("failed to persist signal: {e}"),
                json!({"signal_fingerprint": fingerprint}),
            )
            .await;
        // Defense in depth only: the dedup check above should have already
        // caught a repeat. A persistence failure here still dispatches —
        // the uniqueness constraint isn't the primary admission gate.
    }

    info!(signal_id = %fingerprint, symbol = %payload.symbol, side = payload.side.as_str(), "signal received");

    // 8 & 9. Track in-flight, dispatch.
    let response = {
        let _guard = state.shutdown.track(fingerprint.clone());
        state
            .processor
            .process(
                &fingerprint,
                &payload.symbol,
                payload.side,
                payload.size,
                state.settings.test_mode,
            )
            .await
    };
    let _ = state.store.mark_processed(&fingerprint).await;

    // 10. Respond. Test-mode rewrites the envelope into the dry-run shape.
    if state.settings.test_mode {
        let would_have_executed: Vec<_> = response
            .results
            .iter()
            .map(|r| {
                json!({
                    "dex": r.dex_id,
                    "symbol": payload.symbol,
                    "side": payload.side.as_str(),
                    "size": payload.size.to_string(),
                    "simulated_result": r.status,
                })
            })
            .collect();
        let dry_run = json!({
            "status": "dry_run",
            "signal_id": response.signal_fingerprint,
            "message": "test mode: dispatch simulated against test-only adapters",
            "would_have_executed": would_have_executed,
            "timestamp": response.timestamp,
        });
        return Json(dry_run).into_response();
    }

    Json(response).into_response()
}
