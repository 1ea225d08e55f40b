//! Canonical encoder: normalises a transaction into a stable schema.
//!
//! Multi-asset values flatten to `{coins, assets}` where `assets` is keyed by
//! `"policy.asset"` (bare `policy` for an empty asset name). Redeemers are
//! re-keyed from the feed's positional array to `"purpose:index"`.
//! Certificates, proposals, votes, metadata and scripts pass through as
//! opaque JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoder::{encode_err, TxEncoder};
use crate::error::BridgeError;
use crate::types::{BlockMeta, MultiAsset, Transaction, TxIn, ADA_ASSET, ADA_POLICY};

const NAME: &str = "CANONICAL";

// ─── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatValue {
    pub coins: i128,
    pub assets: BTreeMap<String, i128>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub transaction_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOutput {
    pub address: String,
    pub value: FlatValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datum_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBody {
    pub inputs: Vec<InputRef>,
    pub reference_inputs: Vec<InputRef>,
    pub outputs: Vec<CanonicalOutput>,
    pub mint: FlatValue,
    pub fee: Option<i128>,
    pub validity_interval_start: Option<u64>,
    pub validity_interval_end: Option<u64>,
    pub withdrawals: BTreeMap<String, BTreeMap<String, i128>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub transaction_id: String,
    pub header_hash: String,
    pub slot: u64,
    pub cbor: Option<String>,
    pub body: CanonicalBody,
    pub datums: BTreeMap<String, String>,
    pub redeemers: BTreeMap<String, String>,
    pub metadata: Option<Value>,
    pub certificates: Vec<Value>,
    pub proposals: Vec<Value>,
    pub votes: Vec<Value>,
    pub signatures: BTreeMap<String, String>,
}

/// Wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub network_magic: u32,
    pub transaction: CanonicalTransaction,
    pub timestamp: DateTime<Utc>,
}

// ─── Flattening ──────────────────────────────────────────────────────────────

pub fn asset_key(policy: &str, asset: &str) -> String {
    if asset.is_empty() {
        policy.to_string()
    } else {
        format!("{policy}.{asset}")
    }
}

/// Split base currency from every other asset.
pub fn flatten_value(value: &MultiAsset) -> FlatValue {
    let mut flat = FlatValue::default();
    for (policy, assets) in value {
        for (asset, qty) in assets {
            if policy == ADA_POLICY && asset == ADA_ASSET {
                flat.coins = *qty;
            } else {
                flat.assets.insert(asset_key(policy, asset), *qty);
            }
        }
    }
    flat
}

/// Every entry keyed by `asset_key`, base currency included.
pub fn flatten_all(value: &MultiAsset) -> BTreeMap<String, i128> {
    value
        .iter()
        .flat_map(|(policy, assets)| {
            assets
                .iter()
                .map(move |(asset, qty)| (asset_key(policy, asset), *qty))
        })
        .collect()
}

fn input_refs(inputs: &[TxIn]) -> Vec<InputRef> {
    inputs
        .iter()
        .map(|i| InputRef {
            transaction_id: i.transaction.id.clone(),
            index: i.index,
        })
        .collect()
}

#[derive(Deserialize)]
struct RedeemerEntry {
    validator: RedeemerPointer,
    redeemer: String,
}

#[derive(Deserialize)]
struct RedeemerPointer {
    purpose: String,
    index: u64,
}

/// `[{validator: {purpose, index}, redeemer, executionUnits}]` → `"purpose:index" → redeemer`.
pub fn rekey_redeemers(raw: Option<&Value>) -> Result<BTreeMap<String, String>, BridgeError> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };
    let entries: Vec<RedeemerEntry> =
        serde_json::from_value(raw.clone()).map_err(|e| encode_err(NAME, format!("redeemers: {e}")))?;
    Ok(entries
        .into_iter()
        .map(|r| (format!("{}:{}", r.validator.purpose, r.validator.index), r.redeemer))
        .collect())
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

pub struct CanonicalEncoder {
    network_magic: u32,
}

impl CanonicalEncoder {
    pub fn new(network_magic: u32) -> Self {
        Self { network_magic }
    }

    pub fn transform(
        &self,
        tx: &Transaction,
        block: &BlockMeta,
    ) -> Result<CanonicalTransaction, BridgeError> {
        let outputs = tx
            .outputs
            .iter()
            .map(|o| CanonicalOutput {
                address: o.address.clone(),
                value: flatten_value(&o.value),
                datum: o.datum.clone(),
                datum_hash: o.datum_hash.clone(),
                script: o.script.clone(),
            })
            .collect();

        let body = CanonicalBody {
            inputs: input_refs(&tx.inputs),
            reference_inputs: input_refs(&tx.references),
            outputs,
            mint: flatten_value(&tx.mint),
            fee: tx.fee.as_ref().map(|f| flatten_value(f).coins),
            validity_interval_start: tx.validity_interval.invalid_before,
            validity_interval_end: tx.validity_interval.invalid_after,
            withdrawals: tx
                .withdrawals
                .iter()
                .map(|(addr, v)| (addr.clone(), flatten_all(v)))
                .collect(),
        };

        Ok(CanonicalTransaction {
            transaction_id: tx.id.clone(),
            header_hash: block.hash.clone(),
            slot: block.slot,
            cbor: tx.cbor.clone(),
            body,
            datums: tx.datums.clone(),
            redeemers: rekey_redeemers(tx.redeemers.as_ref())?,
            metadata: tx.metadata.clone(),
            certificates: tx.certificates.clone(),
            proposals: tx.proposals.clone(),
            votes: tx.votes.clone(),
            signatures: tx
                .signatories
                .iter()
                .map(|s| (s.key.clone(), s.signature.clone()))
                .collect(),
        })
    }
}

impl TxEncoder for CanonicalEncoder {
    fn name(&self) -> &str {
        NAME
    }

    fn encode(&self, tx: &Transaction, block: &BlockMeta) -> Result<Vec<u8>, BridgeError> {
        let event = CanonicalEvent {
            network_magic: self.network_magic,
            transaction: self.transform(tx, block)?,
            timestamp: Utc::now(),
        };
        serde_json::to_vec(&event).map_err(|e| encode_err(NAME, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> BlockMeta {
        BlockMeta {
            hash: "hh".into(),
            slot: 42,
            era: "conway".into(),
        }
    }

    #[test]
    fn value_flattening() {
        let value: MultiAsset = serde_json::from_value(json!({
            "ada": {"lovelace": 5_000_000},
            "p1": {"a1": 3}
        }))
        .unwrap();
        let flat = flatten_value(&value);
        assert_eq!(flat.coins, 5_000_000);
        assert_eq!(flat.assets, BTreeMap::from([("p1.a1".to_string(), 3)]));
        assert_eq!(
            serde_json::to_value(&flat).unwrap(),
            json!({"coins": 5000000, "assets": {"p1.a1": 3}})
        );
    }

    #[test]
    fn empty_asset_name_uses_bare_policy() {
        assert_eq!(asset_key("p2", ""), "p2");
        let value: MultiAsset = serde_json::from_value(json!({"p2": {"": 1}})).unwrap();
        assert_eq!(flatten_value(&value).assets["p2"], 1);
    }

    #[test]
    fn flattening_keeps_full_width_token_quantities() {
        let value: MultiAsset = serde_json::from_value(json!({
            "ada": {"lovelace": 1_500_000},
            "p1": {"tok": 18446744073709551615_u64}
        }))
        .unwrap();
        let flat = flatten_value(&value);
        assert_eq!(flat.assets["p1.tok"], 18_446_744_073_709_551_615_i128);
        assert_eq!(
            serde_json::to_value(&flat).unwrap(),
            json!({"coins": 1500000, "assets": {"p1.tok": 18446744073709551615_u64}})
        );
        assert_eq!(flatten_all(&value)["p1.tok"], 18_446_744_073_709_551_615_i128);
    }

    #[test]
    fn transforms_full_transaction() {
        let tx: Transaction = serde_json::from_value(json!({
            "id": "t1",
            "inputs": [{"transaction": {"id": "in0"}, "index": 1}],
            "references": [{"transaction": {"id": "ref0"}, "index": 5}],
            "outputs": [{"address": "addr1", "value": {"ada": {"lovelace": 10}}}],
            "fee": {"ada": {"lovelace": 170000}},
            "validityInterval": {"invalidBefore": 100, "invalidAfter": 200},
            "withdrawals": {"stake1": {"ada": {"lovelace": 893298}}},
            "signatories": [{"key": "k1", "signature": "s1"}],
            "redeemers": [
                {"validator": {"index": 0, "purpose": "spend"}, "redeemer": "d87980",
                 "executionUnits": {"memory": 1, "cpu": 2}}
            ],
            "certificates": [{"type": "stakeDelegation", "credential": "c"}]
        }))
        .unwrap();

        let out = CanonicalEncoder::new(1).transform(&tx, &meta()).unwrap();
        assert_eq!(out.header_hash, "hh");
        assert_eq!(out.body.inputs[0].transaction_id, "in0");
        assert_eq!(out.body.reference_inputs[0].index, 5);
        assert_eq!(out.body.fee, Some(170000));
        assert_eq!(out.body.validity_interval_start, Some(100));
        assert_eq!(out.body.validity_interval_end, Some(200));
        assert_eq!(out.body.withdrawals["stake1"]["ada.lovelace"], 893298);
        assert_eq!(out.redeemers["spend:0"], "d87980");
        assert_eq!(out.signatures["k1"], "s1");
        assert_eq!(out.certificates[0]["credential"], "c");
    }

    #[test]
    fn malformed_redeemers_fail_encoding() {
        let tx = Transaction {
            id: "t".into(),
            redeemers: Some(json!({"spend:0": "oops"})),
            ..Default::default()
        };
        let err = CanonicalEncoder::new(1).encode(&tx, &meta()).unwrap_err();
        assert!(matches!(err, BridgeError::Encode { .. }));
    }

    #[test]
    fn envelope_carries_network_magic() {
        let tx = Transaction {
            id: "t".into(),
            ..Default::default()
        };
        let bytes = CanonicalEncoder::new(764824073).encode(&tx, &meta()).unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["network_magic"], 764824073);
        assert_eq!(v["transaction"]["transaction_id"], "t");
        assert!(v["timestamp"].as_str().is_some());
    }
}
