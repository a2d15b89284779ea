//! The peer-exchange directory, as consumed by the daemon.
//!
//! Pex stores known peers, their trust and privacy flags, and per-peer
//! retry counters that rank candidates for outgoing dials. Retry
//! accounting is entirely pex's responsibility; the daemon only reports
//! outcomes.

use thiserror::Error;

/// A directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub addr: String,
    /// Default-connection peers; exempt from eviction on handshake timeout.
    pub trusted: bool,
    /// Operator-pinned peers, redialed independently of the random budget.
    pub private: bool,
    /// Whether the peer has a reachable inbound port.
    pub has_incoming_port: bool,
    pub retry_times: u32,
}

impl Peer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            trusted: false,
            private: false,
            has_incoming_port: false,
            retry_times: 0,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PexError {
    #[error("peer {0} is not in the directory")]
    PeerNotFound(String),

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("peer directory is full")]
    Full,
}

/// Narrow surface of the peer-exchange directory.
pub trait Pex: Send + Sync {
    /// Up to `n` random public peers that are not trusted.
    fn random_public_untrusted(&self, n: usize) -> Vec<Peer>;

    /// Up to `n` random peers suitable for sharing with other nodes.
    fn random_exchangeable(&self, n: usize) -> Vec<Peer>;

    /// All trusted peers that are public.
    fn trusted_public(&self) -> Vec<Peer>;

    /// All trusted peers.
    fn trusted(&self) -> Vec<Peer>;

    /// All private peers.
    fn private_peers(&self) -> Vec<Peer>;

    fn add_peer(&self, addr: &str) -> Result<(), PexError>;

    /// Add many peers; returns how many were accepted.
    fn add_peers(&self, addrs: &[String]) -> usize;

    fn get_peer(&self, addr: &str) -> Option<Peer>;

    fn remove_peer(&self, addr: &str);

    fn set_has_incoming_port(&self, addr: &str, has: bool) -> Result<(), PexError>;

    fn increase_retry_times(&self, addr: &str);

    fn reset_retry_times(&self, addr: &str);

    fn reset_all_retry_times(&self);

    fn is_full(&self) -> bool;

    /// Whether pex is disabled.
    fn is_disabled(&self) -> bool;

    /// Disable (or re-enable) the directory. Disabling networking on the
    /// daemon disables pex as part of the same cascade.
    fn set_disabled(&self, disabled: bool);

    /// Stop background maintenance and persist state. May block.
    fn shutdown(&self);
}
