// =============================================================================
// Append-only alert ledger
// =============================================================================
//
// The one hard durability contract in this core: every alert that reaches
// the coordinator is recorded here before and after processing, so a crash
// mid-flight leaves an auditable trail instead of a vanished decision
// (spec.md §6). Grounded on `cooprefr-bettersys`'s `vault/vault_db.rs` —
// same `Arc<Mutex<Connection>>` wrapper, `CREATE TABLE IF NOT EXISTS` plus
// index pattern, WAL journal mode.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::types::AlertStatus;

/// One row of the ledger as read back for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub source: String,
    pub received_at: DateTime<Utc>,
    pub destination: String,
    pub terminal_status: String,
}

/// Append-only store for alert lifecycle records.
#[derive(Clone)]
pub struct AlertLedger {
    conn: Arc<Mutex<Connection>>,
}

impl AlertLedger {
    pub async fn open(db_path: &str) -> Result<Self> {
        let path = db_path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path).context("open alert ledger db")?;
            conn.pragma_update(None, "journal_mode", "WAL").ok();
            conn.pragma_update(None, "synchronous", "NORMAL").ok();

            conn.execute(
                "CREATE TABLE IF NOT EXISTS alert_ledger (
                    id TEXT PRIMARY KEY,
                    source TEXT NOT NULL,
                    client_nonce TEXT,
                    received_at INTEGER NOT NULL,
                    destination TEXT,
                    terminal_status TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                [],
            )
            .context("create alert_ledger table")?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_alert_ledger_source_nonce
                    ON alert_ledger(source, client_nonce)",
                [],
            )
            .context("create dedup index")?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_alert_ledger_received_at
                    ON alert_ledger(received_at DESC)",
                [],
            )
            .context("create received_at index")?;

            Ok(conn)
        })
        .await
        .context("join ledger init task")??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert the initial row for a newly received alert.
    pub async fn record_received(
        &self,
        id: &str,
        source: &str,
        client_nonce: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO alert_ledger
                (id, source, client_nonce, received_at, destination, terminal_status, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?4)",
            params![
                id,
                source,
                client_nonce,
                received_at.timestamp_millis(),
                AlertStatus::Received.to_string()
            ],
        )
        .context("insert alert ledger row")?;
        Ok(())
    }

    /// Update the destination and/or current status of an existing row.
    pub async fn update_status(&self, id: &str, destination: Option<&str>, status: AlertStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().timestamp_millis();
        if let Some(destination) = destination {
            conn.execute(
                "UPDATE alert_ledger SET destination = ?2, terminal_status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, destination, status.to_string(), now],
            )
        } else {
            conn.execute(
                "UPDATE alert_ledger SET terminal_status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.to_string(), now],
            )
        }
        .context("update alert ledger row")?;
        Ok(())
    }

    /// Whether `(source, client_nonce)` was already seen within `window`
    /// (spec.md §4.6 dedup sliding window).
    pub async fn seen_within(
        &self,
        source: &str,
        client_nonce: &str,
        window: chrono::Duration,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - window).timestamp_millis();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM alert_ledger
                    WHERE source = ?1 AND client_nonce = ?2 AND received_at >= ?3",
                params![source, client_nonce, cutoff],
                |row| row.get(0),
            )
            .context("query dedup window")?;
        Ok(count > 0)
    }

    /// Most recent `limit` ledger entries, newest first — backs the admin
    /// violations/audit surfaces that want a raw alert trail.
    pub async fn recent(&self, limit: u32) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, source, received_at, destination, terminal_status
                    FROM alert_ledger ORDER BY received_at DESC LIMIT ?1",
            )
            .context("prepare recent query")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let received_at_ms: i64 = row.get(2)?;
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    received_at: Utc.timestamp_millis_opt(received_at_ms).single().unwrap_or_else(Utc::now),
                    destination: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    terminal_status: row.get(4)?,
                })
            })
            .context("query recent ledger rows")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read ledger row")?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger() -> AlertLedger {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite3");
        // Leak the tempdir so the file survives for the duration of the test;
        // the OS cleans /tmp eventually and tests don't share a path.
        std::mem::forget(dir);
        AlertLedger::open(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let ledger = test_ledger().await;
        ledger
            .record_received("alert-1", "tradingview", Some("nonce-1"), Utc::now())
            .await
            .unwrap();
        ledger
            .update_status("alert-1", Some("simulator:acct-1"), AlertStatus::Filled)
            .await
            .unwrap();

        let recent = ledger.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].terminal_status, "filled");
        assert_eq!(recent[0].destination, "simulator:acct-1");
    }

    #[tokio::test]
    async fn dedup_window_detects_recent_nonce() {
        let ledger = test_ledger().await;
        ledger
            .record_received("alert-1", "tradingview", Some("nonce-1"), Utc::now())
            .await
            .unwrap();

        let seen = ledger
            .seen_within("tradingview", "nonce-1", chrono::Duration::hours(24))
            .await
            .unwrap();
        assert!(seen);

        let not_seen = ledger
            .seen_within("tradingview", "nonce-2", chrono::Duration::hours(24))
            .await
            .unwrap();
        assert!(!not_seen);
    }
}
