//! `GET /health`: unauthenticated public health endpoint backed by the
//! Health Aggregator (C7). Grounded on
//! `original_source/src/kitkat/api/health.py`'s composite-view shape.

use axum::extract::State;
use axum::response::Json;

use crate::health::aggregator::SystemHealth;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.health_aggregator.get_system_health().await)
}
