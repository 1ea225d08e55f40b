//! Routing rules and the store that holds them.
//!
//! A rule maps a `(kind, key)` filter to a topic and an encoder name.
//! `(kind, key, topic)` is unique.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Key matching every transaction for the `address` kind.
pub const WILDCARD: &str = "*";
/// Key used by category kinds (`any_cert`, `proposal`, `vote`).
pub const ANY: &str = "any";
/// Encoder used when a rule does not name one.
pub const DEFAULT_ENCODER: &str = "DEFAULT";

/// What part of a transaction a rule filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Address,
    #[serde(alias = "policyId")]
    PolicyId,
    AnyCert,
    CertType,
    Proposal,
    Vote,
}

impl FilterKind {
    pub const ALL: [FilterKind; 6] = [
        Self::Address,
        Self::PolicyId,
        Self::AnyCert,
        Self::CertType,
        Self::Proposal,
        Self::Vote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::PolicyId => "policy_id",
            Self::AnyCert => "any_cert",
            Self::CertType => "cert_type",
            Self::Proposal => "proposal",
            Self::Vote => "vote",
        }
    }

    /// Category kinds match on presence only and always use the `any` key.
    pub fn is_category(&self) -> bool {
        matches!(self, Self::AnyCert | Self::Proposal | Self::Vote)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .or_else(|| (s == "policyId").then_some(Self::PolicyId))
            .ok_or_else(|| BridgeError::InvalidRule(format!("unknown filter type '{s}'")))
    }
}

/// A persisted routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub key: String,
    pub topic: String,
    pub encoder: String,
}

/// A rule as submitted, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    #[serde(default)]
    pub key: String,
    pub topic: String,
    #[serde(default)]
    pub encoder: Option<String>,
}

impl NewRule {
    pub fn new(kind: FilterKind, key: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group_id: None,
            kind,
            key: key.into(),
            topic: topic.into(),
            encoder: None,
        }
    }

    pub fn with_encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = Some(encoder.into());
        self
    }

    /// Normalise keys and encoder name, rejecting rules that can never match.
    pub fn validate(mut self) -> Result<Self, BridgeError> {
        self.topic = self.topic.trim().to_string();
        if self.topic.is_empty() {
            return Err(BridgeError::InvalidRule("topic must not be empty".into()));
        }

        let key = self.key.trim();
        self.key = if self.kind.is_category() {
            if key.is_empty() || key == WILDCARD || key == ANY {
                ANY.to_string()
            } else {
                return Err(BridgeError::InvalidRule(format!(
                    "{} rules only accept the '{ANY}' key",
                    self.kind
                )));
            }
        } else if key.is_empty() {
            return Err(BridgeError::InvalidRule(format!(
                "{} rules need a key",
                self.kind
            )));
        } else if key == WILDCARD && self.kind != FilterKind::Address {
            return Err(BridgeError::InvalidRule(format!(
                "'{WILDCARD}' is only valid for address rules"
            )));
        } else {
            key.to_string()
        };

        let encoder = self
            .encoder
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_ENCODER)
            .to_ascii_uppercase();
        self.encoder = Some(encoder);
        Ok(self)
    }

    pub fn encoder_name(&self) -> &str {
        self.encoder.as_deref().unwrap_or(DEFAULT_ENCODER)
    }
}

/// Durable mapping of routing rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert a rule and return its id. Rejects duplicate `(kind, key, topic)`.
    async fn add(&self, rule: &NewRule) -> Result<i64, BridgeError>;

    async fn remove(&self, id: i64) -> Result<(), BridgeError>;

    /// Rules for an exact `(kind, key)` pair.
    async fn lookup(&self, kind: FilterKind, key: &str) -> Result<Vec<RoutingRule>, BridgeError>;

    async fn list(&self) -> Result<Vec<RoutingRule>, BridgeError>;

    async fn clear(&self) -> Result<(), BridgeError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct RuleTable {
    next_id: i64,
    rows: Vec<RoutingRule>,
}

/// In-memory rule store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryRuleStore {
    data: Mutex<RuleTable>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RuleTable>, BridgeError> {
        self.data
            .lock()
            .map_err(|e| BridgeError::Storage(e.to_string()))
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn add(&self, rule: &NewRule) -> Result<i64, BridgeError> {
        let mut table = self.lock()?;
        let dup = table
            .rows
            .iter()
            .any(|r| r.kind == rule.kind && r.key == rule.key && r.topic == rule.topic);
        if dup {
            return Err(BridgeError::DuplicateRule {
                kind: rule.kind.to_string(),
                key: rule.key.clone(),
                topic: rule.topic.clone(),
            });
        }
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push(RoutingRule {
            id,
            group_id: rule.group_id,
            kind: rule.kind,
            key: rule.key.clone(),
            topic: rule.topic.clone(),
            encoder: rule.encoder_name().to_string(),
        });
        Ok(id)
    }

    async fn remove(&self, id: i64) -> Result<(), BridgeError> {
        let mut table = self.lock()?;
        let before = table.rows.len();
        table.rows.retain(|r| r.id != id);
        if table.rows.len() == before {
            return Err(BridgeError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn lookup(&self, kind: FilterKind, key: &str) -> Result<Vec<RoutingRule>, BridgeError> {
        Ok(self
            .lock()?
            .rows
            .iter()
            .filter(|r| r.kind == kind && r.key == key)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<RoutingRule>, BridgeError> {
        Ok(self.lock()?.rows.clone())
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        self.lock()?.rows.clear();
        Ok(())
    }
}
