//! Router: resolves a transaction to the `(topic, encoder)` pairs that
//! must receive it.
//!
//! Matching is the union of independent lookups against the rule store:
//!
//! 1. `(address, "*")` once per transaction
//! 2. `(address, output.address)` and `(policy_id, policy)` per output
//! 3. `(any_cert, "any")` plus `(cert_type, cert.type)` per certificate
//! 4. `(proposal, "any")` and `(vote, "any")` when present
//!
//! Lookups go through a read-through cache with a fixed TTL that is flushed
//! on every mutation made through the router.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::BridgeError;
use crate::rules::{FilterKind, NewRule, RoutingRule, RuleStore, ANY, WILDCARD};
use crate::types::Transaction;

/// Default cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

type LookupKey = (FilterKind, String);

/// Encoder name → distinct topics.
pub type RoutingDecision = BTreeMap<String, BTreeSet<String>>;

pub struct Router {
    store: Arc<dyn RuleStore>,
    cache: Cache<LookupKey, Arc<Vec<RoutingRule>>>,
}

impl Router {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn RuleStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Resolve a transaction. An empty decision means nothing to publish.
    pub async fn route(&self, tx: &Transaction) -> RoutingDecision {
        let mut decision = RoutingDecision::new();
        for (kind, key) in lookup_keys(tx) {
            match self.lookup(kind, &key).await {
                Ok(rules) => {
                    for rule in rules.iter() {
                        decision
                            .entry(rule.encoder.clone())
                            .or_default()
                            .insert(rule.topic.clone());
                    }
                }
                Err(e) => {
                    tracing::error!(tx_id = %tx.id, kind = %kind, key = %key, error = %e, "Rule lookup failed");
                }
            }
        }
        decision
    }

    /// Cached `(kind, key)` lookup.
    pub async fn lookup(
        &self,
        kind: FilterKind,
        key: &str,
    ) -> Result<Arc<Vec<RoutingRule>>, BridgeError> {
        let cache_key = (kind, key.to_string());
        if let Some(hit) = self.cache.get(&cache_key).await {
            return Ok(hit);
        }
        let rules = Arc::new(self.store.lookup(kind, key).await?);
        self.cache.insert(cache_key, rules.clone()).await;
        Ok(rules)
    }

    // ─── Mutations ───────────────────────────────────────────────────────────

    pub async fn add_rule(&self, rule: &NewRule) -> Result<i64, BridgeError> {
        let id = self.store.add(rule).await?;
        self.cache.invalidate_all();
        tracing::info!(id, kind = %rule.kind, key = %rule.key, topic = %rule.topic, "Routing rule added");
        Ok(id)
    }

    pub async fn remove_rule(&self, id: i64) -> Result<(), BridgeError> {
        self.store.remove(id).await?;
        self.cache.invalidate_all();
        tracing::info!(id, "Routing rule removed");
        Ok(())
    }

    pub async fn list_rules(&self) -> Result<Vec<RoutingRule>, BridgeError> {
        self.store.list().await
    }
}

/// Every `(kind, key)` pair a transaction must be looked up under.
pub fn lookup_keys(tx: &Transaction) -> BTreeSet<LookupKey> {
    let mut keys = BTreeSet::new();
    keys.insert((FilterKind::Address, WILDCARD.to_string()));

    for output in &tx.outputs {
        keys.insert((FilterKind::Address, output.address.clone()));
        for policy in output.value.keys() {
            keys.insert((FilterKind::PolicyId, policy.clone()));
        }
    }

    if !tx.certificates.is_empty() {
        keys.insert((FilterKind::AnyCert, ANY.to_string()));
        for (index, cert) in tx.certificates.iter().enumerate() {
            match cert.get("type").and_then(|t| t.as_str()) {
                Some(kind) => {
                    keys.insert((FilterKind::CertType, kind.to_string()));
                }
                None => {
                    tracing::warn!(tx_id = %tx.id, index, certificate = %cert, "Skipping certificate without a type");
                }
            }
        }
    }

    if !tx.proposals.is_empty() {
        keys.insert((FilterKind::Proposal, ANY.to_string()));
    }
    if !tx.votes.is_empty() {
        keys.insert((FilterKind::Vote, ANY.to_string()));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MemoryRuleStore;
    use crate::types::TxOut;
    use serde_json::json;

    fn output(address: &str, policies: &[&str]) -> TxOut {
        let mut value = crate::types::MultiAsset::new();
        value.entry("ada".into()).or_default().insert("lovelace".into(), 1);
        for p in policies {
            value.entry(p.to_string()).or_default().insert("tok".into(), 1);
        }
        TxOut {
            address: address.into(),
            value,
            datum_hash: None,
            datum: None,
            script: None,
        }
    }

    #[test]
    fn keys_cover_every_criterion() {
        let tx = Transaction {
            id: "t".into(),
            outputs: vec![output("addr1", &["p1"]), output("addr2", &["p1", "p2"])],
            certificates: vec![json!({"type": "stakeDelegation"}), json!({"type": "stakeDelegation"})],
            votes: vec![json!({})],
            ..Default::default()
        };
        let keys = lookup_keys(&tx);
        assert!(keys.contains(&(FilterKind::Address, "*".into())));
        assert!(keys.contains(&(FilterKind::Address, "addr2".into())));
        assert!(keys.contains(&(FilterKind::PolicyId, "p2".into())));
        assert!(keys.contains(&(FilterKind::AnyCert, "any".into())));
        assert!(keys.contains(&(FilterKind::CertType, "stakeDelegation".into())));
        assert!(keys.contains(&(FilterKind::Vote, "any".into())));
        assert!(!keys.contains(&(FilterKind::Proposal, "any".into())));
    }

    #[test]
    fn malformed_certificates_are_skipped() {
        let tx = Transaction {
            id: "t".into(),
            certificates: vec![json!("garbage"), json!({"type": 7}), json!({"type": "poolRetirement"})],
            ..Default::default()
        };
        let certs: Vec<_> = lookup_keys(&tx)
            .into_iter()
            .filter(|(k, _)| *k == FilterKind::CertType)
            .collect();
        assert_eq!(certs, vec![(FilterKind::CertType, "poolRetirement".to_string())]);
    }

    #[tokio::test]
    async fn no_rules_means_empty_decision() {
        let router = Router::new(Arc::new(MemoryRuleStore::new()));
        let tx = Transaction {
            id: "t".into(),
            outputs: vec![output("addr1", &[])],
            ..Default::default()
        };
        assert!(router.route(&tx).await.is_empty());
    }

    #[tokio::test]
    async fn mutation_flushes_cache() {
        let store = Arc::new(MemoryRuleStore::new());
        let router = Router::new(store.clone());
        let tx = Transaction {
            id: "t".into(),
            outputs: vec![output("addr1", &[])],
            ..Default::default()
        };
        assert!(router.route(&tx).await.is_empty());

        let id = router
            .add_rule(&NewRule::new(FilterKind::Address, "addr1", "topic-a").validate().unwrap())
            .await
            .unwrap();
        let decision = router.route(&tx).await;
        assert_eq!(decision["DEFAULT"].iter().collect::<Vec<_>>(), vec!["topic-a"]);

        router.remove_rule(id).await.unwrap();
        assert!(router.route(&tx).await.is_empty());
    }

    #[tokio::test]
    async fn writes_bypassing_router_wait_for_ttl() {
        let store = Arc::new(MemoryRuleStore::new());
        let router = Router::new(store.clone());
        assert!(router.lookup(FilterKind::Address, "a").await.unwrap().is_empty());

        store
            .add(&NewRule::new(FilterKind::Address, "a", "t").validate().unwrap())
            .await
            .unwrap();
        // Still served from cache.
        assert!(router.lookup(FilterKind::Address, "a").await.unwrap().is_empty());
    }
}
