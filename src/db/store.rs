//! SQLite database store implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use crate::config::DeviceRuntimeConfig;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Snapshots kept after pruning.
pub const SNAPSHOT_HISTORY: usize = 16;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid timestamp: {0}")]
    Timestamp(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn.lock().unwrap();
        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        for m in report.applied_migrations() {
            tracing::info!("Store: applied migration {}", m);
        }
        Ok(())
    }

    // --- Snapshots ---

    /// Append a snapshot and drop all but the newest [`SNAPSHOT_HISTORY`].
    pub fn save_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<i64, DbError> {
        let payload = serde_json::to_string(snapshot)?;
        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO snapshots (saved_at, reason, payload) VALUES (?1, ?2, ?3)",
                params![snapshot.saved_at.to_rfc3339(), snapshot.reason, payload],
            )?;
            conn.last_insert_rowid()
        };
        self.prune_snapshots(SNAPSHOT_HISTORY)?;
        Ok(id)
    }

    /// Most recently saved snapshot, if any.
    pub fn latest_snapshot(&self) -> Result<Option<PersistedSnapshot>, DbError> {
        let conn = self.conn.lock().unwrap();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Delete all but the newest `keep` snapshots. Returns rows removed.
    pub fn prune_snapshots(&self, keep: usize) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM snapshots WHERE id NOT IN (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        if removed > 0 {
            tracing::debug!("Store: pruned {} snapshots", removed);
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub fn snapshot_count(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?;
        Ok(count)
    }

    // --- Runtime config ---

    /// Replace the stored runtime config.
    pub fn save_config(&self, config: &DeviceRuntimeConfig) -> Result<(), DbError> {
        let payload = serde_json::to_string(config)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runtime_config (id, updated_at, payload) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at, payload = excluded.payload",
            params![Utc::now().to_rfc3339(), payload],
        )?;
        Ok(())
    }

    /// The stored runtime config with its update time, if one was saved.
    pub fn load_config(&self) -> Result<Option<(DeviceRuntimeConfig, DateTime<Utc>)>, DbError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT payload, updated_at FROM runtime_config WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, updated_at)) = row else {
            return Ok(None);
        };
        let config = serde_json::from_str(&payload)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|_| DbError::Timestamp(updated_at.clone()))?
            .with_timezone(&Utc);
        Ok(Some((config, updated_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AlertRecord, Cause, PlantCondition};
    use crate::supervisor::PowerMode;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn snapshot(reason: &str) -> PersistedSnapshot {
        PersistedSnapshot {
            saved_at: Utc::now(),
            reason: reason.to_string(),
            device_id: "test-device".to_string(),
            condition: PlantCondition::Critical,
            alerts: vec![AlertRecord {
                cause: Cause::Critical,
                onset_at: Utc::now(),
                last_notified_at: Utc::now(),
                repeat_count: 0,
                acknowledged: false,
            }],
            latent_conditions: Vec::new(),
            power_mode: PowerMode::Emergency,
            battery_percent: Some(3),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        assert!(store.latest_snapshot().unwrap().is_none());

        store.save_snapshot(&snapshot("first")).unwrap();
        store.save_snapshot(&snapshot("battery critical")).unwrap();

        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.reason, "battery critical");
        assert_eq!(latest.power_mode, PowerMode::Emergency);
        assert_eq!(latest.alerts[0].cause, Cause::Critical);
    }

    #[test]
    fn test_snapshot_history_is_bounded() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        for i in 0..(SNAPSHOT_HISTORY + 4) {
            store.save_snapshot(&snapshot(&format!("s{}", i))).unwrap();
        }
        assert_eq!(store.snapshot_count().unwrap(), SNAPSHOT_HISTORY as i64);
        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.reason, format!("s{}", SNAPSHOT_HISTORY + 3));
    }

    #[test]
    fn test_config_persists_across_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = Store::new(tmp.path()).unwrap();
            assert!(store.load_config().unwrap().is_none());
            let cfg = DeviceRuntimeConfig {
                moisture_threshold: 42.0,
                repeat_interval: Duration::from_secs(600),
                ..Default::default()
            };
            store.save_config(&cfg).unwrap();
            store.save_config(&cfg).unwrap();
        }

        let store = Store::new(tmp.path()).unwrap();
        let (cfg, _) = store.load_config().unwrap().unwrap();
        assert_eq!(cfg.moisture_threshold, 42.0);
        assert_eq!(cfg.repeat_interval, Duration::from_secs(600));
    }
}
