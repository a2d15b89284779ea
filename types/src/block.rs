//! Block and signed-block primitives.
//!
//! Only the fields the networking core needs travel here: the head sequence
//! drives block solicitation and announcement, and the body carries the
//! transactions a `GiveBlocks` message delivers to the chain engine.

use serde::{Deserialize, Serialize};

use crate::hash::{sha256, Sha256};
use crate::keys::Sig;
use crate::transaction::Transaction;

/// Fixed-size block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Position of this block in the chain, starting at 0 for genesis.
    pub seq: u64,
    /// Block creation time, unix seconds.
    pub time: u64,
    pub prev_hash: Sha256,
    pub body_hash: Sha256,
}

impl BlockHeader {
    /// Digest of the serialized header. Identifies the block.
    pub fn hash(&self) -> Sha256 {
        let bytes = bincode::serialize(self).expect("BlockHeader is always serializable");
        sha256(&bytes)
    }
}

/// A block: header plus transaction body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub head: BlockHeader,
    pub body: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Sha256 {
        self.head.hash()
    }

    pub fn seq(&self) -> u64 {
        self.head.seq
    }
}

/// A block with the master chain's signature over its hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    pub sig: Sig,
}

impl SignedBlock {
    pub fn hash(&self) -> Sha256 {
        self.block.hash()
    }

    pub fn seq(&self) -> u64 {
        self.block.seq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block(seq: u64) -> Block {
        Block {
            head: BlockHeader {
                version: 1,
                seq,
                time: 1_700_000_000 + seq,
                prev_hash: Sha256::ZERO,
                body_hash: Sha256::ZERO,
            },
            body: Vec::new(),
        }
    }

    #[test]
    fn header_hash_is_stable() {
        let b = make_block(5);
        assert_eq!(b.hash(), b.hash());
    }

    #[test]
    fn header_hash_depends_on_seq() {
        assert_ne!(make_block(1).hash(), make_block(2).hash());
    }

    #[test]
    fn signed_block_bincode_roundtrip() {
        let sb = SignedBlock {
            block: make_block(9),
            sig: Sig::ZERO,
        };
        let encoded = bincode::serialize(&sb).unwrap();
        let decoded: SignedBlock = bincode::deserialize(&encoded).unwrap();
        assert_eq!(sb, decoded);
        assert_eq!(decoded.seq(), 9);
    }
}
