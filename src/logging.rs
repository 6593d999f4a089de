//! Structured logging setup and secret redaction.
//!
//! Redaction is applied at the record-construction site (here), not ad hoc
//! at call sites, so every caller gets the same guarantees. Rules are
//! ported 1:1 from this service's upstream `redact_secrets`/`redact_headers`
//! /`truncate_body`/`sanitize_url` helpers.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_BODY_SIZE: usize = 1024;

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-webhook-token",
    "x-secret",
    "api-key",
    "token",
];

/// Configures the global `tracing` subscriber: JSON in production, pretty
/// output in development, driven by `RUST_LOG`/`EnvFilter`.
pub fn init(json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json_output {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

fn api_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(api[_-]?key[s]?["']?\s*[:=]\s*["']?)([a-zA-Z0-9_-]{20,})"#).unwrap()
    })
}

fn secret_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(token|secret|password|bot_token)(["']?\s*[:=]\s*["']?)([a-zA-Z0-9_:-]{8,})"#)
            .unwrap()
    })
}

fn bearer_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(Bearer\s+)([a-zA-Z0-9_.-]+)").unwrap())
}

fn url_secret_param_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\?|&)(token|api_key|secret)=([^&]+)").unwrap()
    })
}

/// API keys -> `***`; tokens/secrets/passwords/bot_token and Bearer
/// credentials -> first 4 chars + `...`. Wallet addresses are never
/// matched by these patterns and so pass through untouched.
pub fn redact_secrets(value: &str) -> String {
    let redacted = api_key_pattern().replace_all(value, "${1}***");
    let redacted = secret_pattern().replace_all(&redacted, |caps: &regex::Captures| {
        let prefix = &caps[1];
        let sep = &caps[2];
        let secret = &caps[3];
        let shown: String = secret.chars().take(4).collect();
        format!("{prefix}{sep}{shown}...")
    });
    let redacted = bearer_pattern().replace_all(&redacted, |caps: &regex::Captures| {
        let prefix = &caps[1];
        let token = &caps[2];
        let shown: String = token.chars().take(4).collect();
        format!("{prefix}{shown}...")
    });
    redacted.into_owned()
}

pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            if SENSITIVE_HEADERS.contains(&key.to_lowercase().as_str()) {
                let redacted = if value.chars().count() > 4 {
                    let shown: String = value.chars().take(4).collect();
                    format!("{shown}...")
                } else {
                    "***".to_string()
                };
                (key.clone(), redacted)
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

pub fn truncate_body(body: &str) -> String {
    let char_count = body.chars().count();
    if char_count > MAX_BODY_SIZE {
        let truncated = char_count - MAX_BODY_SIZE;
        let head: String = body.chars().take(MAX_BODY_SIZE).collect();
        format!("{head}... [TRUNCATED {truncated} bytes]")
    } else {
        body.to_string()
    }
}

pub fn sanitize_url(url: &str) -> String {
    url_secret_param_pattern()
        .replace_all(url, "${1}${2}=***")
        .into_owned()
}
