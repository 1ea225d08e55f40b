//! Sync configuration and runtime state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of checkpoints retained (K).
    pub max_checkpoints: usize,
    /// Fixed delay between subscription attempts.
    pub retry_delay: Duration,
    /// Topic receiving `{rollbackTo}` notifications.
    pub rollback_topic: String,
    /// Consecutive intersection misses before resolving to origin. `0` disables.
    pub intersection_fallback_after: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 10,
            retry_delay: Duration::from_secs(5),
            rollback_topic: "cardano.rollbacks".into(),
            intersection_fallback_after: 3,
        }
    }
}

/// Runtime state of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Not yet started.
    Idle,
    /// Opening a subscription.
    Connecting,
    /// Receiving frames.
    Following,
    /// Waiting out the retry delay.
    Reconnecting,
    /// Cancelled.
    Stopped,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Following => write!(f, "following"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by the sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_point: Option<Point>,
    pub blocks_processed: u64,
    pub rollbacks: u64,
    pub reconnects: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            last_point: None,
            blocks_processed: 0,
            rollbacks: 0,
            reconnects: 0,
        }
    }
}
