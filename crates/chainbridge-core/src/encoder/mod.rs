//! Encoder pipeline: named transforms from a transaction and its block to
//! a wire payload.
//!
//! | Name        | Output                                            |
//! |-------------|---------------------------------------------------|
//! | `DEFAULT`   | `{tx, block}` JSON, field-for-field               |
//! | `SIMPLE`    | `{"txId": ...}`                                   |
//! | `CANONICAL` | normalised transaction wrapped with time + network |
//!
//! Names are case-insensitive.

pub mod canonical;
pub mod full;
pub mod minimal;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BridgeError;
use crate::types::{BlockMeta, Transaction};

pub use canonical::CanonicalEncoder;
pub use full::FullEncoder;
pub use minimal::MinimalEncoder;

/// A single transform capability.
pub trait TxEncoder: Send + Sync {
    /// Registry key, upper case.
    fn name(&self) -> &str;

    fn encode(&self, tx: &Transaction, block: &BlockMeta) -> Result<Vec<u8>, BridgeError>;
}

/// Registry of encoders keyed by upper-cased name.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    encoders: HashMap<String, Arc<dyn TxEncoder>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `DEFAULT`, `SIMPLE` and `CANONICAL`.
    pub fn with_builtins(network_magic: u32) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(FullEncoder));
        reg.register(Arc::new(MinimalEncoder));
        reg.register(Arc::new(CanonicalEncoder::new(network_magic)));
        reg
    }

    pub fn register(&mut self, encoder: Arc<dyn TxEncoder>) {
        self.encoders
            .insert(encoder.name().to_ascii_uppercase(), encoder);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TxEncoder>, BridgeError> {
        self.encoders
            .get(&name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| BridgeError::UnknownEncoder(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.encoders.contains_key(&name.to_ascii_uppercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.encoders.keys().cloned().collect();
        names.sort();
        names
    }
}

pub(crate) fn encode_err(encoder: &str, e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Encode {
        encoder: encoder.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = EncoderRegistry::with_builtins(764824073);
        assert_eq!(reg.get("simple").unwrap().name(), "SIMPLE");
        assert_eq!(reg.get("Canonical").unwrap().name(), "CANONICAL");
        assert!(reg.contains("default"));
        assert_eq!(reg.names(), vec!["CANONICAL", "DEFAULT", "SIMPLE"]);
    }

    #[test]
    fn unknown_name_is_typed_error() {
        let reg = EncoderRegistry::with_builtins(1);
        assert!(matches!(
            reg.get("PROTOBUF"),
            Err(BridgeError::UnknownEncoder(n)) if n == "PROTOBUF"
        ));
    }
}
