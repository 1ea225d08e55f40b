//! Shared types for the bridge pipeline.
//!
//! The block and transaction shapes follow the chain-sync feed's JSON
//! encoding field-for-field, so a frame can be decoded strictly and then
//! re-serialized unchanged by the full encoder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Policy id reserved for the base currency.
pub const ADA_POLICY: &str = "ada";
/// Asset name of the base currency under [`ADA_POLICY`].
pub const ADA_ASSET: &str = "lovelace";

/// Multi-asset value: policy id → asset name → quantity.
pub type MultiAsset = BTreeMap<String, BTreeMap<String, i128>>;

// ─── Point ───────────────────────────────────────────────────────────────────

/// A position in the chain. Ordered by slot, then hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Point {
    pub slot: u64,
    pub hash: String,
}

impl Point {
    pub fn new(slot: u64, hash: impl Into<String>) -> Self {
        Self {
            slot,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.slot)
    }
}

/// A candidate starting position for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// Start of the log.
    Origin,
    At(Point),
}

impl From<Point> for ResumePoint {
    fn from(point: Point) -> Self {
        Self::At(point)
    }
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin => write!(f, "origin"),
            Self::At(p) => write!(f, "{p}"),
        }
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// Block metadata attached to every routed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub hash: String,
    pub slot: u64,
    pub era: String,
}

/// The unit of forward delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Block {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub era: String,
    #[serde(rename = "id")]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default)]
    pub slot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Value>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn meta(&self) -> BlockMeta {
        BlockMeta {
            hash: self.hash.clone(),
            slot: self.slot,
            era: self.era.clone(),
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.slot, self.hash.clone())
    }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// Reference to a previous transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxIn {
    pub transaction: TxRef,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TxOut {
    pub address: String,
    #[serde(default)]
    pub value: MultiAsset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidityInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_before: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Signatory {
    pub key: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_attributes: Option<String>,
}

/// An on-chain transaction as delivered by the feed.
///
/// Only outputs, certificates, proposals and votes drive routing; the
/// remaining fields are carried for re-encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Transaction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spends: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TxIn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<TxIn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collaterals: Vec<TxIn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_collateral: Option<MultiAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral_return: Option<TxOut>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TxOut>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub withdrawals: BTreeMap<String, MultiAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<MultiAsset>,
    #[serde(default)]
    pub validity_interval: ValidityInterval,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mint: MultiAsset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_integrity_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_extra_signatories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_extra_scripts: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposals: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treasury: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatories: Vec<Signatory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub datums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cbor: Option<String>,
}

/// Full per-transaction message: the transaction plus its block.
#[derive(Debug, Clone, Serialize)]
pub struct TxnMessage<'a> {
    pub tx: &'a Transaction,
    pub block: &'a BlockMeta,
}

/// Notification published when the chain discards blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackMessage {
    pub rollback_to: Point,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
