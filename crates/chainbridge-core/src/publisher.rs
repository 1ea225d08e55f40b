//! Publisher seam: the message broker as seen by the bridge.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::BridgeError;

/// Sends a payload to a topic. Must tolerate concurrent calls.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError>;
}

/// A recorded `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publisher that records every message in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<Published>>,
    failing_topics: Mutex<Vec<String>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `topic` fail.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        if let Ok(mut t) = self.failing_topics.lock() {
            t.push(topic.into());
        }
    }

    pub fn sent(&self) -> Vec<Published> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<Published> {
        self.sent()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    fn lock_sent(&self) -> Result<MutexGuard<'_, Vec<Published>>, BridgeError> {
        self.sent.lock().map_err(|e| BridgeError::Other(e.to_string()))
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        let failing = self
            .failing_topics
            .lock()
            .map(|t| t.iter().any(|f| f == topic))
            .unwrap_or(false);
        if failing {
            return Err(BridgeError::Publish {
                topic: topic.to_string(),
                reason: "topic unavailable".into(),
            });
        }
        self.lock_sent()?.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
