//! dex-signal-router: receives charting-platform webhook signals and fans
//! each one out to every active DEX adapter in parallel, with
//! deduplication, per-token rate limiting, health-based routing, and
//! graceful shutdown.
//!
//! Wiring shape (settings -> store -> singletons -> router -> serve ->
//! drain) follows this crate's original top-level `main` construction;
//! the shutdown sequence follows
//! `original_source/src/kitkat/main.py::lifespan`'s teardown order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::middleware as axum_mw;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use dex_signal_router::adapters::{
    extended::{ExtendedAdapter, ExtendedConfig},
    mock::MockAdapter,
    DexAdapter,
};
use dex_signal_router::config::Settings;
use dex_signal_router::dedup::Deduplicator;
use dex_signal_router::health::aggregator::HealthAggregator;
use dex_signal_router::health::monitor::HealthMonitor;
use dex_signal_router::rate_limit::RateLimiter;
use dex_signal_router::shutdown::ShutdownCoordinator;
use dex_signal_router::signal_processor::SignalProcessor;
use dex_signal_router::store::Store;
use dex_signal_router::{api, logging, middleware, AppState};

/// Builds the adapter roster. In test mode the router dispatches to
/// test-only mock adapters so execution records can be tagged and excluded
/// from user-facing aggregates; otherwise it runs the mock alongside the
/// real `ExtendedAdapter` so the fan-out has more than one concrete
/// integration to isolate failures across.
fn build_adapters(settings: &Settings) -> Vec<Arc<dyn DexAdapter>> {
    if settings.test_mode {
        return vec![
            Arc::new(MockAdapter::new("mock-test-A")),
            Arc::new(MockAdapter::new("mock-test-B")),
        ];
    }

    let mut adapters: Vec<Arc<dyn DexAdapter>> = vec![Arc::new(MockAdapter::new("mock"))];
    if !settings.extended_api_key.is_empty() {
        adapters.push(Arc::new(ExtendedAdapter::new(ExtendedConfig::from_settings(settings))));
    }
    adapters
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("load configuration")?;
    logging::init(!settings.test_mode);

    info!(test_mode = settings.test_mode, "starting dex-signal-router");

    let store = Store::open(&settings.database_url).context("open persistent store")?;
    let adapters = build_adapters(&settings);

    for adapter in &adapters {
        if let Err(e) = adapter.connect().await {
            warn!(dex_id = adapter.id(), error = %e, "initial adapter connect failed, health monitor will retry");
        }
    }

    let dedup = Arc::new(Deduplicator::new(settings.dedup_window_seconds));
    let rate_limiter = Arc::new(RateLimiter::new(
        settings.rate_limit_window_seconds,
        settings.rate_limit_max_requests,
    ));
    let shutdown = ShutdownCoordinator::new();
    let processor = Arc::new(SignalProcessor::new(adapters.clone(), store.clone(), 30));
    let health_aggregator = Arc::new(HealthAggregator::new(adapters.clone(), settings.test_mode));
    let health_monitor = Arc::new(HealthMonitor::new(
        adapters.clone(),
        store.clone(),
        settings.health_check_interval_seconds,
        settings.health_max_failures,
    ));
    let _monitor_handle = health_monitor.spawn();

    let error_sweep_store = store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            ticker.tick().await;
            match error_sweep_store.sweep_old_errors().await {
                Ok(deleted) => info!(deleted, "swept error log retention window"),
                Err(e) => error!(error = %e, "error log retention sweep failed"),
            }
        }
    });

    let state = AppState {
        settings: Arc::new(settings.clone()),
        store: store.clone(),
        dedup,
        rate_limiter,
        shutdown: shutdown.clone(),
        processor,
        health_aggregator,
        adapters: Arc::new(adapters.clone()),
    };

    let app = api::router(state).layer(axum_mw::from_fn(middleware::request_logging));

    let addr: SocketAddr = "0.0.0.0:8000".parse().expect("valid bind address");
    let listener = TcpListener::bind(addr).await.context("bind listener")?;
    info!(%addr, "listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!(error = %e, "server error");
    }

    // Shutdown sequence: stop admitting new work, drain in-flight, then
    // disconnect every adapter with an individual timeout so one stuck
    // adapter cannot block the process from exiting.
    info!("shutdown signal received, draining in-flight signals");
    shutdown.initiate();
    let clean = shutdown.await_completion(settings.shutdown_grace_period_seconds).await;
    if clean {
        info!("graceful shutdown complete, all in-flight signals finished");
    } else {
        warn!(
            remaining = shutdown.in_flight_count(),
            "shutdown grace period expired with in-flight work remaining"
        );
    }

    for adapter in &adapters {
        match tokio::time::timeout(Duration::from_secs(5), adapter.disconnect()).await {
            Ok(()) => info!(dex_id = adapter.id(), "adapter disconnected"),
            Err(_) => warn!(dex_id = adapter.id(), "adapter disconnect timed out"),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
