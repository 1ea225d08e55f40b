//! Sync loop scenarios driven by a scripted feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainbridge_core::checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
use chainbridge_core::config::{SyncConfig, SyncStatus};
use chainbridge_core::encoder::EncoderRegistry;
use chainbridge_core::error::BridgeError;
use chainbridge_core::feed::ScriptedFeed;
use chainbridge_core::processor::BlockProcessor;
use chainbridge_core::publisher::{MemoryPublisher, Publisher};
use chainbridge_core::router::Router;
use chainbridge_core::rules::{FilterKind, MemoryRuleStore, NewRule, RuleStore};
use chainbridge_core::syncer::{SyncHandle, Syncer};
use chainbridge_core::types::{Point, ResumePoint};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ─── Frames ───────────────────────────────────────────────────────────────────

fn intersection() -> String {
    json!({"jsonrpc": "2.0", "method": "findIntersection",
           "result": {"intersection": "origin", "tip": {"slot": 1, "id": "t", "height": 1}}})
    .to_string()
}

fn no_intersection() -> String {
    json!({"jsonrpc": "2.0", "method": "findIntersection",
           "error": {"code": 1000, "message": "no intersection found", "data": {"tip": "origin"}}})
    .to_string()
}

fn forward(slot: u64, txs: Value) -> String {
    json!({"jsonrpc": "2.0", "method": "nextBlock", "result": {"direction": "forward",
           "block": {"type": "praos", "era": "conway", "id": format!("h{slot}"), "slot": slot,
                     "height": slot, "transactions": txs}}})
    .to_string()
}

fn backward(slot: u64) -> String {
    json!({"jsonrpc": "2.0", "method": "nextBlock", "result": {"direction": "backward",
           "point": {"slot": slot, "id": format!("h{slot}")}}})
    .to_string()
}

fn backward_origin() -> String {
    json!({"jsonrpc": "2.0", "method": "nextBlock", "result": {"direction": "backward", "point": "origin"}})
        .to_string()
}

// ─── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    feed: Arc<ScriptedFeed>,
    publisher: Arc<MemoryPublisher>,
    checkpoints: Arc<CheckpointManager>,
    handle: SyncHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn config(k: usize) -> SyncConfig {
    SyncConfig {
        max_checkpoints: k,
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn start(
    config: SyncConfig,
    store: Arc<dyn CheckpointStore>,
    feed: Arc<ScriptedFeed>,
    seed: Vec<NewRule>,
) -> Harness {
    start_with(config, store, feed, seed, |p| p as Arc<dyn Publisher>).await
}

/// Like [`start`], with the recording publisher wrapped by `sink`.
async fn start_with(
    config: SyncConfig,
    store: Arc<dyn CheckpointStore>,
    feed: Arc<ScriptedFeed>,
    seed: Vec<NewRule>,
    sink: impl FnOnce(Arc<MemoryPublisher>) -> Arc<dyn Publisher>,
) -> Harness {
    let rules = Arc::new(MemoryRuleStore::new());
    for rule in seed {
        rules.add(&rule.validate().unwrap()).await.unwrap();
    }
    let publisher = Arc::new(MemoryPublisher::new());
    let checkpoints = Arc::new(CheckpointManager::new(store, config.max_checkpoints));
    let processor = Arc::new(BlockProcessor::new(
        Arc::new(Router::new(rules.clone())),
        EncoderRegistry::with_builtins(1),
        sink(publisher.clone()),
    ));
    let syncer = Arc::new(Syncer::new(feed.clone(), processor, checkpoints.clone(), config));
    let handle = syncer.handle();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { syncer.run(cancel).await }
    });
    Harness {
        feed,
        publisher,
        checkpoints,
        handle,
        cancel,
        task,
    }
}

async fn wait_for(handle: &SyncHandle, what: &str, pred: impl Fn(&SyncStatus) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if pred(&handle.status()) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {:?}", handle.status());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn slots(checkpoints: &CheckpointManager) -> Vec<u64> {
    checkpoints
        .resume_candidates()
        .await
        .unwrap()
        .iter()
        .map(|p| p.slot)
        .collect()
}

impl Harness {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("sync loop did not stop")
            .unwrap();
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn retention_keeps_the_k_newest_blocks() {
    let feed = Arc::new(ScriptedFeed::new());
    let mut frames = vec![intersection()];
    frames.extend((1..=15).map(|s| forward(s, json!([]))));
    feed.push_session(frames);

    let h = start(config(10), Arc::new(MemoryCheckpointStore::new()), feed, vec![]).await;
    wait_for(&h.handle, "15 blocks", |s| s.blocks_processed == 15).await;

    assert_eq!(slots(&h.checkpoints).await, (6..=15).rev().collect::<Vec<_>>());
    assert_eq!(h.handle.status().last_point, Some(Point::new(15, "h15")));
    h.stop().await;
}

#[tokio::test]
async fn rollbacks_prune_and_notify() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([
        intersection(),
        forward(10, json!([])),
        forward(20, json!([])),
        backward(15),
        // Nothing above slot 30: checkpoints unchanged, notice still sent.
        backward(30),
        backward_origin(),
        forward(25, json!([])),
    ]);

    let h = start(config(10), Arc::new(MemoryCheckpointStore::new()), feed, vec![]).await;
    wait_for(&h.handle, "3 blocks", |s| s.blocks_processed == 3).await;

    assert_eq!(slots(&h.checkpoints).await, vec![25, 10]);
    let notices = h.publisher.sent_to("cardano.rollbacks");
    assert_eq!(notices.len(), 2);
    let first: Value = serde_json::from_slice(&notices[0].payload).unwrap();
    assert_eq!(first, json!({"rollbackTo": {"slot": 15, "hash": "h15"}}));
    assert_eq!(h.handle.status().rollbacks, 2);
    h.stop().await;
}

#[tokio::test]
async fn garbage_frames_do_not_stop_delivery() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([
        intersection(),
        "{not json".to_string(),
        json!({"jsonrpc": "2.0", "method": "nextBlock", "result": {"direction": "sideways"}}).to_string(),
        json!({"jsonrpc": "2.0", "method": "queryLedgerState/tip", "result": {}}).to_string(),
        forward(7, json!([{"id": "tx7", "outputs": [{"address": "addr1", "value": {}}]}])),
    ]);

    let rule = NewRule::new(FilterKind::Address, "addr1", "txs");
    let h = start(config(5), Arc::new(MemoryCheckpointStore::new()), feed, vec![rule]).await;
    wait_for(&h.handle, "block 7", |s| s.blocks_processed == 1).await;

    assert_eq!(slots(&h.checkpoints).await, vec![7]);
    assert_eq!(h.publisher.sent_to("txs").len(), 1);
    assert_eq!(h.handle.status().reconnects, 0);
    h.stop().await;
}

#[tokio::test]
async fn forced_restart_resumes_from_override() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([intersection(), forward(1, json!([])), forward(2, json!([]))]);
    feed.push_session([intersection(), forward(100, json!([]))]);

    let h = start(config(10), Arc::new(MemoryCheckpointStore::new()), feed, vec![]).await;
    wait_for(&h.handle, "first session", |s| s.blocks_processed == 2).await;

    h.handle.set_start_point(Point::new(50, "h50")).await.unwrap();
    wait_for(&h.handle, "second session", |s| s.blocks_processed == 3).await;

    let requests = h.feed.requests();
    assert_eq!(requests[0], vec![ResumePoint::Origin]);
    assert_eq!(requests[1], vec![ResumePoint::At(Point::new(50, "h50"))]);
    // History before the override was discarded.
    assert_eq!(slots(&h.checkpoints).await, vec![100]);
    assert!(h.handle.pending_start_point().await.is_none());
    h.stop().await;
}

#[tokio::test]
async fn repeated_missing_intersection_falls_back_to_origin() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store.append_and_trim(&Point::new(100, "h100"), 2).await.unwrap();
    store.append_and_trim(&Point::new(101, "h101"), 2).await.unwrap();

    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([no_intersection()]);
    feed.push_session([no_intersection()]);
    feed.push_session([
        intersection(),
        forward(1, json!([])),
        forward(2, json!([])),
        forward(3, json!([])),
    ]);

    let h = start(
        SyncConfig {
            intersection_fallback_after: 2,
            ..config(2)
        },
        store,
        feed,
        vec![],
    )
    .await;
    wait_for(&h.handle, "blocks after fallback", |s| s.blocks_processed == 3).await;

    let requests = h.feed.requests();
    let stale = vec![
        ResumePoint::At(Point::new(101, "h101")),
        ResumePoint::At(Point::new(100, "h100")),
    ];
    assert_eq!(requests[0], stale);
    assert_eq!(requests[1], stale);
    assert_eq!(requests[2], vec![ResumePoint::Origin]);
    // Stale higher slots are gone; only the new branch is retained.
    assert_eq!(slots(&h.checkpoints).await, vec![3, 2]);
    h.stop().await;
}

// ─── Override during delivery ─────────────────────────────────────────────────

/// Records like [`MemoryPublisher`] but holds every send for `delay`.
struct SlowPublisher {
    inner: Arc<MemoryPublisher>,
    started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl Publisher for SlowPublisher {
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.send(topic, payload).await
    }
}

#[tokio::test]
async fn override_during_delivery_is_not_undone_by_the_old_block() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([
        intersection(),
        forward(500, json!([{"id": "tx500", "outputs": [{"address": "addr1", "value": {}}]}])),
    ]);
    feed.push_session([intersection(), forward(11, json!([])), forward(12, json!([]))]);

    let started = Arc::new(Notify::new());
    let rule = NewRule::new(FilterKind::Address, "addr1", "txs");
    let h = start_with(
        config(2),
        Arc::new(MemoryCheckpointStore::new()),
        feed,
        vec![rule],
        {
            let started = started.clone();
            move |inner| {
                Arc::new(SlowPublisher {
                    inner,
                    started,
                    delay: Duration::from_millis(300),
                }) as Arc<dyn Publisher>
            }
        },
    )
    .await;

    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("block 500 never reached the publisher");
    h.handle.set_start_point(Point::new(10, "h10")).await.unwrap();
    wait_for(&h.handle, "override session", |s| s.blocks_processed == 2).await;

    assert_eq!(
        h.feed.requests()[1],
        vec![ResumePoint::At(Point::new(10, "h10"))]
    );
    assert_eq!(slots(&h.checkpoints).await, vec![12, 11]);
    assert_eq!(h.publisher.sent_to("txs").len(), 1);
    assert_eq!(h.handle.status().last_point, Some(Point::new(12, "h12")));
    h.stop().await;
}

// ─── Persistence failure ──────────────────────────────────────────────────────

struct BrokenStore;

#[async_trait]
impl CheckpointStore for BrokenStore {
    async fn append_and_trim(&self, _: &Point, _: usize) -> Result<(), BridgeError> {
        Err(BridgeError::Storage("disk full".into()))
    }
    async fn latest(&self, _: usize) -> Result<Vec<Checkpoint>, BridgeError> {
        Ok(vec![])
    }
    async fn clear(&self) -> Result<(), BridgeError> {
        Ok(())
    }
    async fn delete_after(&self, _: u64) -> Result<u64, BridgeError> {
        Ok(0)
    }
}

#[tokio::test]
async fn checkpoint_failure_ends_the_subscription() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push_session([intersection(), forward(1, json!([])), forward(2, json!([]))]);

    let h = start(config(3), Arc::new(BrokenStore), feed, vec![]).await;
    wait_for(&h.handle, "reconnect", |s| s.reconnects >= 1).await;

    let status = h.handle.status();
    assert_eq!(status.blocks_processed, 0);
    assert!(status.last_point.is_none());
    h.stop().await;
}
