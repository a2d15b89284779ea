//! The narrow daemon capability handed to message processing.
//!
//! Sub-components hold this trait, not the concrete daemon, which keeps
//! the dependency arrow pointing one way and lets tests substitute a
//! recording double.

use std::collections::HashMap;

use obol_messages::{Introduction, Message};
use obol_types::{PubKey, Sha256, SignedBlock, Transaction};

use crate::config::DaemonConfig;
use crate::connections::{Connection, IntroducedError};
use crate::error::{DaemonError, DisconnectReason};
use crate::pex::{Peer, PexError};
use crate::pool::PoolError;
use crate::visor::{TxnInjectResult, VisorError};

/// Operations the dispatcher and gateway may perform on the daemon.
pub trait Daemoner {
    // ── Pool pass-throughs ──────────────────────────────────────────────
    fn send_message(&self, addr: &str, msg: Message) -> Result<(), PoolError>;
    fn broadcast_message(&self, msg: Message) -> Result<(), PoolError>;
    fn disconnect_pool(&self, addr: &str, reason: DisconnectReason) -> Result<(), PoolError>;
    fn is_default_connection(&self, addr: &str) -> bool;
    fn is_max_default_connections_reached(&self) -> Result<bool, PoolError>;

    // ── Pex pass-throughs ───────────────────────────────────────────────
    fn pex_disabled(&self) -> bool;
    fn random_exchangeable(&self, n: usize) -> Vec<Peer>;
    fn add_peers(&self, addrs: &[String]) -> usize;
    fn set_has_incoming_port(&self, addr: &str) -> Result<(), PexError>;
    fn increase_retry_times(&self, addr: &str);
    fn reset_retry_times(&self, addr: &str);
    fn is_trusted_peer(&self, addr: &str) -> bool;
    fn remove_peer(&self, addr: &str);

    // ── Connection table ────────────────────────────────────────────────
    fn record_peer_height(&mut self, addr: &str, height: u64);
    fn connection_introduced(
        &mut self,
        addr: &str,
        intro: &Introduction,
    ) -> Result<Connection, IntroducedError>;

    // ── Identity and configuration ──────────────────────────────────────
    fn mirror(&self) -> u32;
    fn daemon_config(&self) -> &DaemonConfig;
    fn blockchain_pubkey(&self) -> PubKey;

    // ── Daemon operations ───────────────────────────────────────────────
    fn request_blocks_from_addr(&self, addr: &str) -> Result<(), DaemonError>;
    fn announce_all_txns(&self) -> Result<(), DaemonError>;

    // ── Visor pass-throughs ─────────────────────────────────────────────
    fn head_bk_seq(&self) -> Result<Option<u64>, VisorError>;
    fn get_signed_blocks_since(&self, seq: u64, count: u64)
        -> Result<Vec<SignedBlock>, VisorError>;
    fn execute_signed_block(&self, b: SignedBlock) -> Result<(), VisorError>;
    fn get_unconfirmed_unknown(&self, hashes: &[Sha256]) -> Result<Vec<Sha256>, VisorError>;
    fn get_unconfirmed_known(&self, hashes: &[Sha256]) -> Result<Vec<Transaction>, VisorError>;
    fn inject_transaction(&self, txn: Transaction) -> Result<TxnInjectResult, VisorError>;
    fn set_transactions_announced(&self, txns: &HashMap<Sha256, u64>) -> Result<(), VisorError>;
}
