//! SQLite storage backend for ChainBridge.
//!
//! Persists routing rules and checkpoints to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainbridge_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./bridge.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use chainbridge_core::checkpoint::{Checkpoint, CheckpointStore};
use chainbridge_core::error::BridgeError;
use chainbridge_core::rules::{FilterKind, NewRule, RoutingRule, RuleStore};
use chainbridge_core::types::Point;

use crate::rows::{insert_err, storage_err};

/// SQLite-backed rule and checkpoint storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./bridge.db"`) or a full
    /// SQLite URL (`"sqlite:./bridge.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, BridgeError> {
        if path.contains(":memory:") {
            return Self::in_memory().await;
        }
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Single connection, so every query sees the same database.
    pub async fn in_memory() -> Result<Self, BridgeError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), BridgeError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mappings (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER,
                type     TEXT    NOT NULL,
                key      TEXT    NOT NULL,
                topic    TEXT    NOT NULL,
                encoder  TEXT    NOT NULL DEFAULT 'DEFAULT',
                UNIQUE (type, key, topic)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                slot       INTEGER NOT NULL,
                hash       TEXT    NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_slot ON checkpoints (slot DESC, id DESC);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!("SqliteStorage schema initialized");
        Ok(())
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<RoutingRule, BridgeError> {
    let kind: String = row.try_get("type").map_err(storage_err)?;
    Ok(RoutingRule {
        id: row.try_get("id").map_err(storage_err)?,
        group_id: row.try_get("group_id").map_err(storage_err)?,
        kind: FilterKind::from_str(&kind)?,
        key: row.try_get("key").map_err(storage_err)?,
        topic: row.try_get("topic").map_err(storage_err)?,
        encoder: row.try_get("encoder").map_err(storage_err)?,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, BridgeError> {
    let slot: i64 = row.try_get("slot").map_err(storage_err)?;
    Ok(Checkpoint {
        point: Point::new(slot as u64, row.try_get::<String, _>("hash").map_err(storage_err)?),
        seq: row.try_get("id").map_err(storage_err)?,
        recorded_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

// ─── RuleStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for SqliteStorage {
    async fn add(&self, rule: &NewRule) -> Result<i64, BridgeError> {
        let row = sqlx::query(
            "INSERT INTO mappings (group_id, type, key, topic, encoder)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(rule.group_id)
        .bind(rule.kind.as_str())
        .bind(&rule.key)
        .bind(&rule.topic)
        .bind(rule.encoder_name())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_err(e, rule))?;
        row.try_get("id").map_err(storage_err)
    }

    async fn remove(&self, id: i64) -> Result<(), BridgeError> {
        let result = sqlx::query("DELETE FROM mappings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(BridgeError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn lookup(&self, kind: FilterKind, key: &str) -> Result<Vec<RoutingRule>, BridgeError> {
        sqlx::query(
            "SELECT id, group_id, type, key, topic, encoder FROM mappings
             WHERE type = ? AND key = ? ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(rule_from_row)
        .collect()
    }

    async fn list(&self) -> Result<Vec<RoutingRule>, BridgeError> {
        sqlx::query("SELECT id, group_id, type, key, topic, encoder FROM mappings ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?
            .iter()
            .map(rule_from_row)
            .collect()
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        sqlx::query("DELETE FROM mappings")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn append_and_trim(&self, point: &Point, retention: usize) -> Result<(), BridgeError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("INSERT INTO checkpoints (slot, hash, created_at) VALUES (?, ?, ?)")
            .bind(point.slot as i64)
            .bind(&point.hash)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "DELETE FROM checkpoints WHERE id NOT IN (
                SELECT id FROM checkpoints ORDER BY slot DESC, id DESC LIMIT ?
            )",
        )
        .bind(retention.max(1) as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)
    }

    async fn latest(&self, n: usize) -> Result<Vec<Checkpoint>, BridgeError> {
        sqlx::query(
            "SELECT id, slot, hash, created_at FROM checkpoints
             ORDER BY slot DESC, id DESC LIMIT ?",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(checkpoint_from_row)
        .collect()
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        sqlx::query("DELETE FROM checkpoints")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_after(&self, slot: u64) -> Result<u64, BridgeError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE slot > ?")
            .bind(slot as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}
