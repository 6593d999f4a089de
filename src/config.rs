//! Environment-driven process configuration.
//!
//! Follows this crate's existing convention (see the old
//! `DataSourceKillSwitch::new` constructor) of reading `env::var`, parsing,
//! and falling back to a typed default rather than pulling in a settings
//! crate.

use std::env;

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub webhook_token: String,
    pub test_mode: bool,
    pub app_host: String,
    pub database_url: String,
    pub health_check_interval_seconds: u64,
    pub health_max_failures: u32,
    pub health_max_backoff_seconds: u64,
    pub shutdown_grace_period_seconds: u64,
    pub dedup_window_seconds: u64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: u32,
    pub extended_api_key: String,
    pub extended_api_secret: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Settings {
    /// Loads configuration from the environment (via `.env` if present).
    /// Fails with `CONFIGURATION_ERROR` semantics when the required
    /// `WEBHOOK_TOKEN` is missing, matching the source service's startup
    /// behavior of refusing to boot without it.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let webhook_token = match env::var("WEBHOOK_TOKEN") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("CONFIGURATION_ERROR: WEBHOOK_TOKEN is required and must be non-empty"),
        };

        Ok(Self {
            webhook_token,
            test_mode: env::var("TEST_MODE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on"))
                .unwrap_or(false),
            app_host: env::var("APP_HOST").unwrap_or_else(|_| "localhost:8000".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "dex_router.db".to_string()),
            health_check_interval_seconds: env_or("HEALTH_CHECK_INTERVAL_SECONDS", 30),
            health_max_failures: env_or("HEALTH_MAX_FAILURES", 3),
            health_max_backoff_seconds: env_or("HEALTH_MAX_BACKOFF_SECONDS", 30),
            shutdown_grace_period_seconds: env_or("SHUTDOWN_GRACE_PERIOD_SECONDS", 30),
            dedup_window_seconds: env_or("DEDUP_WINDOW_SECONDS", 60),
            rate_limit_window_seconds: env_or("RATE_LIMIT_WINDOW_SECONDS", 60),
            rate_limit_max_requests: env_or("RATE_LIMIT_MAX_REQUESTS", 10),
            extended_api_key: env::var("EXTENDED_API_KEY").unwrap_or_default(),
            extended_api_secret: env::var("EXTENDED_API_SECRET").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_a_configuration_error() {
        for key in ["WEBHOOK_TOKEN", "TEST_MODE"] {
            env::remove_var(key);
        }
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("CONFIGURATION_ERROR"));
    }

    #[test]
    fn defaults_are_applied() {
        env::set_var("WEBHOOK_TOKEN", "shh");
        env::remove_var("HEALTH_CHECK_INTERVAL_SECONDS");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.health_check_interval_seconds, 30);
        assert_eq!(settings.rate_limit_max_requests, 10);
        env::remove_var("WEBHOOK_TOKEN");
    }
}
