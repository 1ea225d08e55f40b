//! Block processing: routes, encodes and publishes every transaction of a
//! block.
//!
//! One task per transaction, joined before returning. A failing transaction
//! is logged and counted; it never fails the block or its siblings.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::encoder::EncoderRegistry;
use crate::publisher::Publisher;
use crate::router::Router;
use crate::types::{Block, BlockMeta, Transaction};

/// Per-block delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub transactions: usize,
    /// Successful `send` calls.
    pub published: usize,
    /// Topic deliveries that did not happen.
    pub failed: usize,
}

impl BlockSummary {
    fn absorb(&mut self, other: BlockSummary) {
        self.published += other.published;
        self.failed += other.failed;
    }
}

pub struct BlockProcessor {
    router: Arc<Router>,
    encoders: EncoderRegistry,
    publisher: Arc<dyn Publisher>,
}

impl BlockProcessor {
    pub fn new(router: Arc<Router>, encoders: EncoderRegistry, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            router,
            encoders,
            publisher,
        }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// Process every transaction concurrently and wait for all of them.
    pub async fn process_block(self: &Arc<Self>, block: Block) -> BlockSummary {
        let meta = Arc::new(block.meta());
        let mut summary = BlockSummary {
            transactions: block.transactions.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for tx in block.transactions {
            let this = Arc::clone(self);
            let meta = Arc::clone(&meta);
            tasks.spawn(async move { this.process_transaction(&tx, &meta).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tx_summary) => summary.absorb(tx_summary),
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(slot = meta.slot, hash = %meta.hash, error = %e, "Transaction task aborted");
                }
            }
        }

        tracing::debug!(
            slot = meta.slot,
            hash = %meta.hash,
            transactions = summary.transactions,
            published = summary.published,
            failed = summary.failed,
            "Block processed"
        );
        summary
    }

    /// Route, encode and publish a single transaction.
    pub async fn process_transaction(&self, tx: &Transaction, block: &BlockMeta) -> BlockSummary {
        let mut summary = BlockSummary::default();
        let decision = self.router.route(tx).await;
        if decision.is_empty() {
            return summary;
        }

        for (encoder_name, topics) in decision {
            let encoder = match self.encoders.get(&encoder_name) {
                Ok(enc) => enc,
                Err(e) => {
                    tracing::error!(tx_id = %tx.id, encoder = %encoder_name, error = %e, "Skipping topic group");
                    summary.failed += topics.len();
                    continue;
                }
            };
            let payload = match encoder.encode(tx, block) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(tx_id = %tx.id, encoder = %encoder_name, slot = block.slot, error = %e, "Encoding failed");
                    summary.failed += topics.len();
                    continue;
                }
            };
            for topic in topics {
                match self.publisher.send(&topic, &payload).await {
                    Ok(()) => summary.published += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(tx_id = %tx.id, topic = %topic, encoder = %encoder_name, error = %e, "Publish failed");
                    }
                }
            }
        }
        summary
    }
}
