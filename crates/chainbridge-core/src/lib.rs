//! chainbridge-core: rollback-aware change-data-capture from a chain-sync
//! feed to broker topics.
//!
//! # Architecture
//!
//! ```text
//! Syncer ──► ChainFeed (subscription, raw frames)
//!   ├── frame            (strict JSON-RPC decoding)
//!   ├── CheckpointManager (K most recent points, rollback pruning)
//!   └── BlockProcessor   (one task per transaction, joined per block)
//!         ├── Router          (rule lookups through a TTL cache)
//!         ├── EncoderRegistry (DEFAULT / SIMPLE / CANONICAL)
//!         └── Publisher       (broker)
//! ```

pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod error;
pub mod feed;
pub mod frame;
pub mod processor;
pub mod publisher;
pub mod router;
pub mod rules;
pub mod syncer;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{SyncConfig, SyncState, SyncStatus};
pub use encoder::{EncoderRegistry, TxEncoder};
pub use error::BridgeError;
pub use feed::{ChainFeed, FeedSubscription, ScriptedFeed, SubscriptionCloser};
pub use frame::{decode_frame, Frame};
pub use processor::{BlockProcessor, BlockSummary};
pub use publisher::{MemoryPublisher, Publisher};
pub use router::{Router, RoutingDecision};
pub use rules::{FilterKind, MemoryRuleStore, NewRule, RoutingRule, RuleStore};
pub use syncer::{SyncHandle, Syncer};
pub use types::{Block, BlockMeta, Point, ResumePoint, Transaction};
