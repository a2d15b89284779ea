//! Transaction primitive.
//!
//! The networking core treats transactions as opaque payloads with a stable
//! identity; validation is the chain engine's job.

use serde::{Deserialize, Serialize};

use crate::hash::{sha256, Sha256};
use crate::keys::PubKey;

/// A single transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Destination, as a raw public key.
    pub dest: PubKey,
    pub coins: u64,
    pub hours: u64,
}

/// A transaction spending previous outputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Digest over the inputs and outputs, excluding signatures.
    pub inner_hash: Sha256,
    /// Hashes of the unspent outputs being consumed.
    pub inputs: Vec<Sha256>,
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    /// Identity of the transaction: digest of its serialized form.
    pub fn hash(&self) -> Sha256 {
        let bytes = bincode::serialize(self).expect("Transaction is always serializable");
        sha256(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_txn(seed: u8) -> Transaction {
        Transaction {
            inner_hash: sha256(&[seed]),
            inputs: vec![sha256(&[seed, 1])],
            outputs: vec![TransactionOutput {
                dest: PubKey::ZERO,
                coins: u64::from(seed) * 100,
                hours: 1,
            }],
        }
    }

    #[test]
    fn hash_is_stable() {
        let t = make_txn(3);
        assert_eq!(t.hash(), t.hash());
    }

    #[test]
    fn distinct_txns_have_distinct_hashes() {
        assert_ne!(make_txn(1).hash(), make_txn(2).hash());
    }

    #[test]
    fn bincode_roundtrip() {
        let t = make_txn(8);
        let encoded = bincode::serialize(&t).unwrap();
        let decoded: Transaction = bincode::deserialize(&encoded).unwrap();
        assert_eq!(t, decoded);
        assert_eq!(t.hash(), decoded.hash());
    }
}
