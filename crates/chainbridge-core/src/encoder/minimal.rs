use serde::Serialize;

use crate::encoder::{encode_err, TxEncoder};
use crate::error::BridgeError;
use crate::types::{BlockMeta, Transaction};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxIdOnly<'a> {
    tx_id: &'a str,
}

/// Serialises only the transaction id.
pub struct MinimalEncoder;

impl TxEncoder for MinimalEncoder {
    fn name(&self) -> &str {
        "SIMPLE"
    }

    fn encode(&self, tx: &Transaction, _block: &BlockMeta) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(&TxIdOnly { tx_id: &tx.id }).map_err(|e| encode_err(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_id() {
        let tx = Transaction {
            id: "abc".into(),
            ..Default::default()
        };
        let block = BlockMeta {
            hash: "h".into(),
            slot: 1,
            era: "babbage".into(),
        };
        assert_eq!(
            MinimalEncoder.encode(&tx, &block).unwrap(),
            br#"{"txId":"abc"}"#.to_vec()
        );
    }
}
