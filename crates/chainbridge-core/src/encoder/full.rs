use crate::encoder::{encode_err, TxEncoder};
use crate::error::BridgeError;
use crate::types::{BlockMeta, Transaction, TxnMessage};

/// Serialises the whole transaction plus block metadata.
pub struct FullEncoder;

impl TxEncoder for FullEncoder {
    fn name(&self) -> &str {
        "DEFAULT"
    }

    fn encode(&self, tx: &Transaction, block: &BlockMeta) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(&TxnMessage { tx, block }).map_err(|e| encode_err(self.name(), e))
    }
}
