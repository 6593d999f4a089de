//! Ingress Controller (C10): HTTP surface.

pub mod health;
pub mod webhook;

use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde_json::{json, Value};

use crate::AppState;

async fn liveness() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/webhook", post(webhook::webhook))
        .route("/health", get(health::health))
        .with_state(state)
}
