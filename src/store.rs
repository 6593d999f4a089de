//! Persistent store: `signals`, `executions`, `error_log` tables over a
//! single SQLite connection, WAL mode forced at open. Hand-written schema
//! and prepared statements, no ORM — the same shape as `vault/vault_db.rs`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::{
    ErrorCategory, ErrorLevel, ErrorLogEntry, ExecutionRecord, ExecutionStatus, Side, Signal,
    SignalPayload,
};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = Connection::open(database_url).context("open dex router db")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enable WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("set synchronous=NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signals (
                fingerprint TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                received_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_fingerprint TEXT NOT NULL,
                adapter_id TEXT NOT NULL,
                external_order_id TEXT,
                status TEXT NOT NULL,
                result_blob TEXT NOT NULL,
                latency_ms INTEGER,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_created_at ON executions(created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_signal ON executions(signal_fingerprint)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS error_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                context_blob TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_error_log_created_at ON error_log(created_at DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts the signal row. Fails on a duplicate `fingerprint`; the
    /// ingress path is expected to have already checked the deduplicator,
    /// so this uniqueness constraint is defense in depth, not the primary
    /// dedup mechanism.
    pub async fn record_signal(&self, signal: &Signal) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO signals (fingerprint, symbol, side, size, received_at, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                signal.fingerprint,
                signal.payload.symbol,
                signal.payload.side.as_str(),
                signal.payload.size.to_string(),
                signal.received_at.to_rfc3339(),
                signal.processed as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn mark_processed(&self, fingerprint: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE signals SET processed = 1 WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    pub async fn get_signal(&self, fingerprint: &str) -> Result<Option<Signal>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT fingerprint, symbol, side, size, received_at, processed
                 FROM signals WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    let side_str: String = row.get(2)?;
                    let size_str: String = row.get(3)?;
                    let received_at_str: String = row.get(4)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        side_str,
                        size_str,
                        received_at_str,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(fingerprint, symbol, side_str, size_str, received_at_str, processed)| {
            Signal {
                fingerprint,
                payload: SignalPayload {
                    symbol,
                    side: if side_str == "buy" { Side::Buy } else { Side::Sell },
                    size: size_str.parse().unwrap_or_default(),
                },
                received_at: DateTime::parse_from_rfc3339(&received_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                processed: processed != 0,
            }
        }))
    }

    /// Coerces `status` to `Partial` when `result_blob` carries both a
    /// nonzero `filled_amount` and a nonzero `remaining_amount`, regardless
    /// of the caller-supplied status — the numeric-only rule this service
    /// preserves from its upstream partial-fill detection.
    pub async fn record_execution(
        &self,
        signal_fingerprint: &str,
        adapter_id: &str,
        external_order_id: Option<&str>,
        status: ExecutionStatus,
        result_blob: serde_json::Value,
        latency_ms: Option<u64>,
    ) -> Result<ExecutionRecord> {
        let status = if is_partial_fill(&result_blob) {
            ExecutionStatus::Partial
        } else {
            status
        };

        let created_at = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO executions
                (signal_fingerprint, adapter_id, external_order_id, status, result_blob, latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                signal_fingerprint,
                adapter_id,
                external_order_id,
                status.as_str(),
                result_blob.to_string(),
                latency_ms.map(|v| v as i64),
                created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(ExecutionRecord {
            id,
            signal_fingerprint: signal_fingerprint.to_string(),
            adapter_id: adapter_id.to_string(),
            external_order_id: external_order_id.map(|s| s.to_string()),
            status,
            result_blob,
            latency_ms,
            created_at,
        })
    }

    pub async fn count_executions_for_signal(&self, signal_fingerprint: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM executions WHERE signal_fingerprint = ?1",
            params![signal_fingerprint],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Fire-and-forget from the caller's perspective: failures are logged
    /// via `tracing` at `warn` and never propagated.
    pub async fn record_error(
        &self,
        level: ErrorLevel,
        category: ErrorCategory,
        message: &str,
        context_blob: serde_json::Value,
    ) {
        let level_str = match level {
            ErrorLevel::Error => "error",
            ErrorLevel::Warning => "warning",
        };
        let created_at = Utc::now();
        let conn = self.conn.lock().await;
        if let Err(e) = conn.execute(
            "INSERT INTO error_log (level, category, message, context_blob, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                level_str,
                category.code(),
                message,
                context_blob.to_string(),
                created_at.to_rfc3339(),
            ],
        ) {
            tracing::warn!(error = %e, "failed to persist error log entry");
        }
    }

    /// Deletes rows older than 90 days. Run on a periodic background task
    /// rather than behind an admin endpoint, since no admin API is in scope.
    pub async fn sweep_old_errors(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(90);
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM error_log WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    #[cfg(test)]
    pub async fn recent_errors(&self) -> Result<Vec<ErrorLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, level, category, message, context_blob, created_at
             FROM error_log ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let level_str: String = row.get(1)?;
                let category_str: String = row.get(2)?;
                let context_str: String = row.get(4)?;
                let created_at_str: String = row.get(5)?;
                Ok(ErrorLogEntry {
                    id: row.get(0)?,
                    level: if level_str == "error" {
                        ErrorLevel::Error
                    } else {
                        ErrorLevel::Warning
                    },
                    category: ErrorCategory::from_code(&category_str)
                        .unwrap_or(ErrorCategory::DatabaseError),
                    message: row.get(3)?,
                    context_blob: serde_json::from_str(&context_str).unwrap_or_default(),
                    created_at: DateTime::parse_from_rfc3339(&created_at_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn is_partial_fill(result_blob: &serde_json::Value) -> bool {
    let filled = result_blob
        .get("filled_amount")
        .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
        .unwrap_or(0.0);
    let remaining = result_blob
        .get("remaining_amount")
        .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
        .unwrap_or(0.0);
    filled > 0.0 && remaining > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sample_signal(fingerprint: &str) -> Signal {
        Signal {
            fingerprint: fingerprint.to_string(),
            payload: SignalPayload {
                symbol: "ETH-PERP".to_string(),
                side: Side::Buy,
                size: Decimal::new(5, 1),
            },
            received_at: Utc::now(),
            processed: false,
        }
    }

    #[tokio::test]
    async fn record_and_fetch_signal_round_trips() {
        let store = Store::open(":memory:").unwrap();
        let signal = sample_signal("abc123");
        store.record_signal(&signal).await.unwrap();

        let fetched = store.get_signal("abc123").await.unwrap().unwrap();
        assert_eq!(fetched.payload.symbol, "ETH-PERP");
        assert_eq!(fetched.payload.side, Side::Buy);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_insert_fails() {
        let store = Store::open(":memory:").unwrap();
        let signal = sample_signal("abc123");
        store.record_signal(&signal).await.unwrap();
        let second = store.record_signal(&signal).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn partial_fill_is_coerced_regardless_of_caller_status() {
        let store = Store::open(":memory:").unwrap();
        let blob = serde_json::json!({"filled_amount": "0.3", "remaining_amount": "0.2"});
        let record = store
            .record_execution("abc123", "mock-A", Some("order-1"), ExecutionStatus::Filled, blob, Some(10))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Partial);
    }

    #[tokio::test]
    async fn fully_filled_is_not_coerced_to_partial() {
        let store = Store::open(":memory:").unwrap();
        let blob = serde_json::json!({"filled_amount": "0.5", "remaining_amount": "0"});
        let record = store
            .record_execution("abc123", "mock-A", Some("order-1"), ExecutionStatus::Filled, blob, Some(10))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn sweep_deletes_only_entries_older_than_90_days() {
        let store = Store::open(":memory:").unwrap();
        store
            .record_error(ErrorLevel::Warning, ErrorCategory::InvalidSignal, "stale", serde_json::json!({}))
            .await;

        {
            let conn = store.conn.lock().await;
            let old = Utc::now() - chrono::Duration::days(91);
            conn.execute(
                "UPDATE error_log SET created_at = ?1",
                params![old.to_rfc3339()],
            )
            .unwrap();
        }

        let deleted = store.sweep_old_errors().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.recent_errors().await.unwrap().is_empty());
    }
}
