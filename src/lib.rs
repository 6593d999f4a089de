//! dex-signal-router: ingests charting-platform webhook signals and fans
//! each one out to every active DEX adapter in parallel.
//!
//! Exposes the core modules for use by the binary and integration tests.

pub mod adapters;
pub mod api;
pub mod config;
pub mod dedup;
pub mod fingerprint;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod shutdown;
pub mod signal_processor;
pub mod store;

use std::sync::Arc;

use adapters::DexAdapter;
use config::Settings;
use dedup::Deduplicator;
use health::aggregator::HealthAggregator;
use rate_limit::RateLimiter;
use shutdown::ShutdownCoordinator;
use signal_processor::SignalProcessor;
use store::Store;

/// Shared application state injected into every request handler. Each
/// singleton is constructed once at process startup (`main.rs`) and
/// cloned cheaply (everything here is `Arc`-backed or itself a handle).
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub dedup: Arc<Deduplicator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub shutdown: ShutdownCoordinator,
    pub processor: Arc<SignalProcessor>,
    pub health_aggregator: Arc<HealthAggregator>,
    pub adapters: Arc<Vec<Arc<dyn DexAdapter>>>,
}
