//! Syncer: subscription lifecycle, resume-point resolution, forward and
//! backward handling, and the reconnect loop.
//!
//! ```text
//!   resolve resume points ──► subscribe ──► frames ──┬─ forward  ─► process block ─► commit checkpoint
//!          ▲                                          ├─ backward ─► prune checkpoints ─► rollback notice
//!          └──────── fixed delay ◄── error / close ◄──┘
//! ```
//!
//! The loop only exits on cancellation. An operator override, set through
//! [`SyncHandle::set_start_point`], is consumed by the next resolution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointManager;
use crate::config::{SyncConfig, SyncState, SyncStatus};
use crate::error::BridgeError;
use crate::feed::{ChainFeed, FeedSubscription, SubscriptionCloser};
use crate::frame::{decode_frame, Frame};
use crate::processor::BlockProcessor;
use crate::types::{Block, Point, ResumePoint, RollbackMessage};

/// State shared between the loop and operator requests.
#[derive(Default)]
struct SyncControl {
    start_point: Option<Point>,
    active: Option<SubscriptionCloser>,
}

pub struct Syncer {
    feed: Arc<dyn ChainFeed>,
    processor: Arc<BlockProcessor>,
    checkpoints: Arc<CheckpointManager>,
    config: SyncConfig,
    control: Arc<Mutex<SyncControl>>,
    status: watch::Sender<SyncStatus>,
    intersection_misses: AtomicU32,
}

impl Syncer {
    pub fn new(
        feed: Arc<dyn ChainFeed>,
        processor: Arc<BlockProcessor>,
        checkpoints: Arc<CheckpointManager>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            feed,
            processor,
            checkpoints,
            config,
            control: Arc::new(Mutex::new(SyncControl::default())),
            status,
            intersection_misses: AtomicU32::new(0),
        }
    }

    /// Handle for operator requests and status reads.
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            control: Arc::clone(&self.control),
            checkpoints: Arc::clone(&self.checkpoints),
            status: self.status.subscribe(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ─── Main loop ───────────────────────────────────────────────────────────

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            retention = self.checkpoints.retention(),
            retry_delay_secs = self.config.retry_delay.as_secs(),
            "Sync loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.sync_once(&cancel).await {
                Ok(()) => {}
                Err(BridgeError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, transient = e.is_transient(), "Subscription ended");
                }
            }

            self.status.send_modify(|s| {
                s.state = SyncState::Reconnecting;
                s.reconnects += 1;
            });
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }

        self.set_state(SyncState::Stopped);
        tracing::info!("Sync loop stopped");
    }

    /// One subscription: resolve, subscribe, follow until it ends.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        self.set_state(SyncState::Connecting);
        let points = self.resolve_resume_points().await?;
        tracing::info!(
            candidates = points.len(),
            first = ?points.first(),
            "Opening subscription"
        );

        let mut sub = self.feed.subscribe(&points).await?;
        let closer = sub.closer();
        {
            let mut control = self.control.lock().await;
            if let Some(stale) = control.active.replace(closer.clone()) {
                stale.close();
            }
            // An override that arrived while subscribing wins immediately.
            if control.start_point.is_some() {
                closer.close();
            }
        }

        let result = self.follow(sub.as_mut(), &closer, cancel, points.len()).await;

        self.control.lock().await.active = None;
        result
    }

    /// Pick the candidate points for the next subscription.
    ///
    /// A pending override is used alone and cleared. Otherwise every retained
    /// checkpoint is offered, newest first, or `Origin` when there are none.
    /// After too many consecutive misses the checkpoints are cleared and the
    /// next subscription starts from `Origin`.
    pub async fn resolve_resume_points(&self) -> Result<Vec<ResumePoint>, BridgeError> {
        {
            let mut control = self.control.lock().await;
            if let Some(point) = control.start_point.take() {
                self.intersection_misses.store(0, Ordering::Relaxed);
                tracing::info!(slot = point.slot, hash = %point.hash, "Resuming from operator start point");
                return Ok(vec![ResumePoint::At(point)]);
            }
        }

        let limit = self.config.intersection_fallback_after;
        let misses = self.intersection_misses.load(Ordering::Relaxed);
        if limit > 0 && misses >= limit {
            tracing::warn!(misses, "Intersection repeatedly not found; clearing checkpoints and resuming from origin");
            self.checkpoints.reset().await?;
            self.intersection_misses.store(0, Ordering::Relaxed);
            return Ok(vec![ResumePoint::Origin]);
        }

        let candidates = self.checkpoints.resume_candidates().await?;
        if candidates.is_empty() {
            return Ok(vec![ResumePoint::Origin]);
        }
        Ok(candidates.into_iter().map(ResumePoint::At).collect())
    }

    async fn follow(
        &self,
        sub: &mut dyn FeedSubscription,
        closer: &SubscriptionCloser,
        cancel: &CancellationToken,
        candidates: usize,
    ) -> Result<(), BridgeError> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    closer.close();
                    return Err(BridgeError::Cancelled);
                }
                next = sub.next_frame() => next?,
            };
            let Some(raw) = next else {
                return Err(BridgeError::Feed("subscription closed".into()));
            };

            let frame = match decode_frame(&raw) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, frame = %raw, "Dropping undecodable frame");
                    continue;
                }
            };

            match frame {
                Frame::IntersectionFound(point) => {
                    self.intersection_misses.store(0, Ordering::Relaxed);
                    self.set_state(SyncState::Following);
                    match point {
                        Some(p) => tracing::info!(slot = p.slot, hash = %p.hash, "Intersection found"),
                        None => tracing::info!("Intersection found at origin"),
                    }
                }
                Frame::IntersectionNotFound => {
                    let misses = self.intersection_misses.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(candidates, misses, "No intersection found");
                    return Err(BridgeError::IntersectionNotFound { candidates });
                }
                Frame::RollForward(block) => self.roll_forward(block, closer).await?,
                Frame::RollBackward(point) => self.roll_backward(point).await?,
                Frame::Unknown(method) => {
                    tracing::warn!(method = %method, "Ignoring frame with unknown method");
                }
            }
        }
    }

    // ─── Frame handlers ──────────────────────────────────────────────────────

    /// Publish a block, then commit its checkpoint.
    ///
    /// The commit runs under the control lock and is skipped once `closer`
    /// has fired, so an override that reset the log mid-block stays reset.
    async fn roll_forward(&self, block: Block, closer: &SubscriptionCloser) -> Result<(), BridgeError> {
        let point = block.point();
        let summary = self.processor.process_block(block).await;
        if summary.failed > 0 {
            tracing::warn!(
                slot = point.slot,
                hash = %point.hash,
                failed = summary.failed,
                "Block committed with undelivered messages"
            );
        }

        {
            let _control = self.control.lock().await;
            if closer.is_closed() {
                tracing::info!(slot = point.slot, hash = %point.hash, "Subscription closed; checkpoint not committed");
                return Ok(());
            }
            self.checkpoints.commit(&point).await.map_err(|e| {
                tracing::error!(slot = point.slot, hash = %point.hash, error = %e, "Checkpoint commit failed");
                e
            })?;
        }

        self.status.send_modify(|s| {
            s.state = SyncState::Following;
            s.blocks_processed += 1;
            s.last_point = Some(point);
        });
        Ok(())
    }

    async fn roll_backward(&self, point: Option<Point>) -> Result<(), BridgeError> {
        let Some(point) = point else {
            tracing::info!("Rollback without target; nothing to prune");
            return Ok(());
        };
        tracing::warn!(slot = point.slot, hash = %point.hash, "Chain rolled back");

        self.checkpoints.rollback_to(&point).await?;

        let notice = RollbackMessage {
            rollback_to: point.clone(),
        };
        match serde_json::to_vec(&notice) {
            Ok(payload) => {
                if let Err(e) = self
                    .processor
                    .publisher()
                    .send(&self.config.rollback_topic, &payload)
                    .await
                {
                    tracing::error!(topic = %self.config.rollback_topic, slot = point.slot, error = %e, "Rollback notice not delivered");
                }
            }
            Err(e) => tracing::error!(error = %e, "Rollback notice not encoded"),
        }

        self.status.send_modify(|s| {
            s.rollbacks += 1;
            s.last_point = Some(point);
        });
        Ok(())
    }

    fn set_state(&self, state: SyncState) {
        self.status.send_modify(|s| s.state = state);
    }
}

// ─── Operator handle ─────────────────────────────────────────────────────────

/// Cloneable handle exposing the forced-restart path and status.
#[derive(Clone)]
pub struct SyncHandle {
    control: Arc<Mutex<SyncControl>>,
    checkpoints: Arc<CheckpointManager>,
    status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Force the next subscription to start at `point`.
    ///
    /// Clears persisted checkpoints and closes the active subscription.
    pub async fn set_start_point(&self, point: Point) -> Result<(), BridgeError> {
        let mut control = self.control.lock().await;
        self.checkpoints.reset().await?;
        tracing::info!(slot = point.slot, hash = %point.hash, "Start point overridden");
        control.start_point = Some(point);
        if let Some(active) = control.active.take() {
            active.close();
        }
        Ok(())
    }

    pub async fn pending_start_point(&self) -> Option<Point> {
        self.control.lock().await.start_point.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }
}
