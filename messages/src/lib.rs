//! Wire message types for obol node-to-node communication.
//!
//! Every inbound payload decodes into exactly one [`Message`] variant; the
//! daemon's dispatcher matches on the variant. Framing and byte layout are
//! the socket pool's concern — these types only fix the serde shape.

use serde::{Deserialize, Serialize};

use obol_types::{PubKey, Sha256, SignedBlock, Transaction};

/// A peer's network address as exchanged over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
}

impl PeerAddr {
    /// Canonical `"ip:port"` form used as the connection key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Error parsing the extra field of an [`Introduction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidExtra;

/// The first message each side must send on a new connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Introduction {
    /// Random non-zero process identifier, detects self- and duplicate
    /// connections.
    pub mirror: u32,
    /// The port the remote accepts inbound connections on (0 = none).
    pub listen_port: u16,
    pub protocol_version: u32,
    /// Forward-compatible trailer. When non-empty, the first 33 bytes are
    /// the sender's blockchain public key.
    pub extra: Vec<u8>,
}

impl Introduction {
    pub const PUBKEY_LEN: usize = 33;

    /// Extract the blockchain pubkey from the extra field.
    ///
    /// Empty extra means the peer predates the field and declares nothing.
    /// Anything non-empty but shorter than a pubkey is malformed.
    pub fn blockchain_pubkey(&self) -> Result<Option<PubKey>, InvalidExtra> {
        if self.extra.is_empty() {
            return Ok(None);
        }
        if self.extra.len() < Self::PUBKEY_LEN {
            return Err(InvalidExtra);
        }
        let pk = PubKey::from_slice(&self.extra[..Self::PUBKEY_LEN]).ok_or(InvalidExtra)?;
        Ok(Some(pk))
    }
}

/// Request up to `request_blocks` blocks following `last_block`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocks {
    pub last_block: u64,
    pub request_blocks: u64,
}

/// All message types in the protocol, as a closed sum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // Peer exchange
    GetPeers,
    GivePeers { peers: Vec<PeerAddr> },

    // Handshake
    Introduction(Introduction),

    // Liveness
    Ping,
    Pong,

    // Block propagation
    GetBlocks(GetBlocks),
    GiveBlocks { blocks: Vec<SignedBlock> },
    AnnounceBlocks { max_bk_seq: u64 },

    // Transaction propagation
    GetTxns { txns: Vec<Sha256> },
    GiveTxns { txns: Vec<Transaction> },
    AnnounceTxns { txns: Vec<Sha256> },
}

impl Message {
    /// Variant name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetPeers => "GetPeers",
            Message::GivePeers { .. } => "GivePeers",
            Message::Introduction(_) => "Introduction",
            Message::Ping => "Ping",
            Message::Pong => "Pong",
            Message::GetBlocks(_) => "GetBlocks",
            Message::GiveBlocks { .. } => "GiveBlocks",
            Message::AnnounceBlocks { .. } => "AnnounceBlocks",
            Message::GetTxns { .. } => "GetTxns",
            Message::GiveTxns { .. } => "GiveTxns",
            Message::AnnounceTxns { .. } => "AnnounceTxns",
        }
    }

    /// Transaction hashes a successful send of this message announced to
    /// the peer, if any. The send-result worker feeds these into the
    /// announced-txn cache.
    pub fn announced_txn_hashes(&self) -> Option<Vec<Sha256>> {
        match self {
            Message::AnnounceTxns { txns } => Some(txns.clone()),
            Message::GiveTxns { txns } => Some(txns.iter().map(|t| t.hash()).collect()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_key() {
        let p = PeerAddr {
            ip: "10.0.0.2".to_string(),
            port: 7777,
        };
        assert_eq!(p.key(), "10.0.0.2:7777");
    }

    #[test]
    fn introduction_empty_extra_has_no_pubkey() {
        let intro = Introduction {
            mirror: 1,
            listen_port: 6677,
            protocol_version: 2,
            extra: Vec::new(),
        };
        assert_eq!(intro.blockchain_pubkey(), Ok(None));
    }

    #[test]
    fn introduction_short_extra_is_invalid() {
        let intro = Introduction {
            mirror: 1,
            listen_port: 6677,
            protocol_version: 2,
            extra: vec![0u8; 16],
        };
        assert_eq!(intro.blockchain_pubkey(), Err(InvalidExtra));
    }

    #[test]
    fn introduction_extra_carries_pubkey_and_ignores_trailer() {
        let mut extra = vec![3u8; 33];
        extra.extend_from_slice(b"future fields");
        let intro = Introduction {
            mirror: 1,
            listen_port: 6677,
            protocol_version: 2,
            extra,
        };
        assert_eq!(intro.blockchain_pubkey(), Ok(Some(PubKey::new([3u8; 33]))));
    }

    #[test]
    fn announced_hashes_only_for_txn_carriers() {
        let h = obol_types::sha256(b"t");
        assert_eq!(
            Message::AnnounceTxns { txns: vec![h] }.announced_txn_hashes(),
            Some(vec![h])
        );
        assert!(Message::GetPeers.announced_txn_hashes().is_none());
        assert!(Message::Ping.announced_txn_hashes().is_none());
    }

    #[test]
    fn message_bincode_roundtrip() {
        let m = Message::GetBlocks(GetBlocks {
            last_block: 12,
            request_blocks: 20,
        });
        let encoded = bincode::serialize(&m).unwrap();
        let decoded: Message = bincode::deserialize(&encoded).unwrap();
        assert_eq!(m, decoded);
        assert_eq!(decoded.name(), "GetBlocks");
    }
}
