//! The chain engine ("visor"), as consumed by the daemon.
//!
//! The visor validates and executes blocks, advances the head, and owns
//! the unconfirmed transaction pool. It serializes internally; the daemon
//! may call it from any run-loop branch.

use std::collections::HashMap;

use thiserror::Error;

use obol_types::{Sha256, SignedBlock, Transaction};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VisorError {
    #[error("block {seq} was rejected: {cause}")]
    BlockRejected { seq: u64, cause: String },

    #[error("transaction violates a hard constraint: {0}")]
    TxnViolatesHardConstraint(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

/// A transaction was injected but violates a soft constraint; it stays in
/// the pool and the violation is reported to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoftConstraintViolation(pub String);

/// Outcome of [`Visor::inject_transaction`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnInjectResult {
    /// Whether the pool already held this transaction.
    pub known: bool,
    pub soft_violation: Option<SoftConstraintViolation>,
}

/// Narrow surface of the chain engine.
pub trait Visor: Send + Sync {
    /// Sequence of the highest executed block, or `None` on an empty chain.
    fn head_bk_seq(&self) -> Result<Option<u64>, VisorError>;

    /// Up to `count` signed blocks with sequence greater than `seq`.
    fn get_signed_blocks_since(&self, seq: u64, count: u64)
        -> Result<Vec<SignedBlock>, VisorError>;

    fn execute_signed_block(&self, b: SignedBlock) -> Result<(), VisorError>;

    /// Package pending transactions into a block, execute it, and return it.
    /// Only meaningful on the master chain.
    fn create_and_execute_block(&self) -> Result<SignedBlock, VisorError>;

    /// Add a transaction to the unconfirmed pool unless it violates a hard
    /// constraint.
    fn inject_transaction(&self, txn: Transaction) -> Result<TxnInjectResult, VisorError>;

    /// Re-check unconfirmed transactions; returns the hashes that became
    /// valid.
    fn refresh_unconfirmed(&self) -> Result<Vec<Sha256>, VisorError>;

    /// Drop unconfirmed transactions that now violate hard constraints;
    /// returns the removed hashes.
    fn remove_invalid_unconfirmed(&self) -> Result<Vec<Sha256>, VisorError>;

    fn get_all_unconfirmed_transactions(&self) -> Result<Vec<Transaction>, VisorError>;

    fn get_all_valid_unconfirmed_tx_hashes(&self) -> Result<Vec<Sha256>, VisorError>;

    /// The subset of `hashes` the unconfirmed pool does not hold.
    fn get_unconfirmed_unknown(&self, hashes: &[Sha256]) -> Result<Vec<Sha256>, VisorError>;

    /// The transactions from `hashes` the unconfirmed pool does hold.
    fn get_unconfirmed_known(&self, hashes: &[Sha256]) -> Result<Vec<Transaction>, VisorError>;

    /// Persist announcement timestamps for the given transactions.
    fn set_transactions_announced(&self, txns: &HashMap<Sha256, u64>) -> Result<(), VisorError>;

    /// Whether this node signs new blocks.
    fn is_master(&self) -> bool;
}
