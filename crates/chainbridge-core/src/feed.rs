//! Upstream log feed seam.
//!
//! A `ChainFeed` opens subscriptions at a list of candidate points. A
//! subscription yields raw frames in order; decoding happens in the sync
//! loop so one bad frame can be logged and skipped.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::types::ResumePoint;

/// Closes a subscription from outside the task that reads it.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionCloser {
    token: CancellationToken,
}

impl SubscriptionCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closer that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the subscription is closed.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

#[async_trait]
pub trait FeedSubscription: Send {
    /// Next raw frame. `Ok(None)` once the subscription was closed locally.
    async fn next_frame(&mut self) -> Result<Option<String>, BridgeError>;

    fn closer(&self) -> SubscriptionCloser;
}

#[async_trait]
pub trait ChainFeed: Send + Sync {
    async fn subscribe(
        &self,
        points: &[ResumePoint],
    ) -> Result<Box<dyn FeedSubscription>, BridgeError>;
}

// ─── Scripted feed (for testing) ──────────────────────────────────────────────

/// A feed that replays pre-recorded sessions, one per `subscribe` call.
///
/// Each session is a list of frames. When a session runs out it waits
/// until closed, mimicking a live feed with no new blocks.
#[derive(Default)]
pub struct ScriptedFeed {
    sessions: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<Vec<ResumePoint>>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_session<I, S>(&self, frames: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut s) = self.sessions.lock() {
            s.push_back(frames.into_iter().map(Into::into).collect());
        }
    }

    /// Candidate points passed to each `subscribe` call so far.
    pub fn requests(&self) -> Vec<Vec<ResumePoint>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

struct ScriptedSubscription {
    frames: VecDeque<String>,
    closer: SubscriptionCloser,
}

#[async_trait]
impl FeedSubscription for ScriptedSubscription {
    async fn next_frame(&mut self) -> Result<Option<String>, BridgeError> {
        if self.closer.is_closed() {
            return Ok(None);
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.closer.closed().await;
                Ok(None)
            }
        }
    }

    fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }
}

#[async_trait]
impl ChainFeed for ScriptedFeed {
    async fn subscribe(
        &self,
        points: &[ResumePoint],
    ) -> Result<Box<dyn FeedSubscription>, BridgeError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(points.to_vec());
        }
        let frames = self
            .sessions
            .lock()
            .map_err(|e| BridgeError::Feed(e.to_string()))?
            .pop_front()
            .ok_or_else(|| BridgeError::Feed("no scripted session left".into()))?;
        Ok(Box::new(ScriptedSubscription {
            frames: frames.into(),
            closer: SubscriptionCloser::new(),
        }))
    }
}
