//! Health Aggregator (C7) and Health Monitor (C8).

pub mod aggregator;
pub mod monitor;

pub use aggregator::HealthAggregator;
pub use monitor::HealthMonitor;
