//! Error types for the chainbridge pipeline.

use thiserror::Error;

/// Errors that can occur while syncing, routing, encoding or publishing.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("No intersection found for {candidates} candidate point(s)")]
    IntersectionNotFound { candidates: usize },

    #[error("Frame decode error: {0}")]
    Decode(String),

    #[error("Encoder '{encoder}' failed: {reason}")]
    Encode { encoder: String, reason: String },

    #[error("Unknown encoder: {0}")]
    UnknownEncoder(String),

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Rule already exists: ({kind}, {key}) -> {topic}")]
    DuplicateRule {
        kind: String,
        key: String,
        topic: String,
    },

    #[error("Rule {0} not found")]
    RuleNotFound(i64),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Returns `true` for upstream failures that the sync loop retries after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Feed(_) | Self::IntersectionNotFound { .. } | Self::Decode(_)
        )
    }

    /// Returns `true` if the error came from a persistence backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
