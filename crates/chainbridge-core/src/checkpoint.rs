//! Checkpoint manager: persists the sync position for crash recovery.
//!
//! A checkpoint stores a fully processed block's point. The store keeps the K
//! most recent ones; on restart all of them are offered to the feed as
//! intersection candidates, which tolerates shallow rollbacks that happened
//! while the bridge was disconnected.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::types::Point;

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub point: Point,
    /// Insertion sequence, breaks ties between equal slots.
    pub seq: i64,
    /// Unix timestamp of when this checkpoint was recorded.
    pub recorded_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore`, `SqliteStorage`,
/// and `PostgresStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert a checkpoint, then drop everything but the `retention` newest.
    /// Must be atomic.
    async fn append_and_trim(&self, point: &Point, retention: usize) -> Result<(), BridgeError>;

    /// Up to `n` checkpoints, newest first.
    async fn latest(&self, n: usize) -> Result<Vec<Checkpoint>, BridgeError>;

    /// Delete every checkpoint.
    async fn clear(&self) -> Result<(), BridgeError>;

    /// Delete checkpoints with `slot > slot`. Returns the number removed.
    async fn delete_after(&self, slot: u64) -> Result<u64, BridgeError>;
}

/// Manages checkpoint reads/writes for the sync loop.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    /// How many checkpoints to keep (K).
    retention: usize,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, retention: usize) -> Self {
        Self {
            store,
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Record a fully processed block.
    pub async fn commit(&self, point: &Point) -> Result<(), BridgeError> {
        self.store.append_and_trim(point, self.retention).await
    }

    /// All retained points, newest first.
    pub async fn resume_candidates(&self) -> Result<Vec<Point>, BridgeError> {
        Ok(self
            .store
            .latest(self.retention)
            .await?
            .into_iter()
            .map(|cp| cp.point)
            .collect())
    }

    /// Prune checkpoints the chain discarded.
    pub async fn rollback_to(&self, point: &Point) -> Result<u64, BridgeError> {
        let removed = self.store.delete_after(point.slot).await?;
        if removed > 0 {
            tracing::info!(slot = point.slot, hash = %point.hash, removed, "Pruned checkpoints after rollback");
        }
        Ok(removed)
    }

    /// Forget all persisted history.
    pub async fn reset(&self) -> Result<(), BridgeError> {
        self.store.clear().await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct MemoryLog {
    next_seq: i64,
    entries: Vec<Checkpoint>,
}

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<MemoryLog>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryLog>, BridgeError> {
        self.data
            .lock()
            .map_err(|e| BridgeError::Storage(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append_and_trim(&self, point: &Point, retention: usize) -> Result<(), BridgeError> {
        let mut log = self.lock()?;
        log.next_seq += 1;
        let seq = log.next_seq;
        log.entries.push(Checkpoint {
            point: point.clone(),
            seq,
            recorded_at: chrono::Utc::now().timestamp(),
        });
        log.entries
            .sort_by(|a, b| (b.point.slot, b.seq).cmp(&(a.point.slot, a.seq)));
        log.entries.truncate(retention.max(1));
        Ok(())
    }

    async fn latest(&self, n: usize) -> Result<Vec<Checkpoint>, BridgeError> {
        Ok(self.lock()?.entries.iter().take(n).cloned().collect())
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        self.lock()?.entries.clear();
        Ok(())
    }

    async fn delete_after(&self, slot: u64) -> Result<u64, BridgeError> {
        let mut log = self.lock()?;
        let before = log.entries.len();
        log.entries.retain(|cp| cp.point.slot <= slot);
        Ok((before - log.entries.len()) as u64)
    }
}
