//! Nullable chain engine — a scripted head, an in-memory unconfirmed
//! pool, and full recording of executed blocks and announcement flushes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use obol_daemon::{SoftConstraintViolation, TxnInjectResult, Visor, VisorError};
use obol_types::{Block, BlockHeader, Sha256, Sig, SignedBlock, Transaction};

#[derive(Default)]
struct VisorState {
    head: Option<u64>,
    /// Executed chain, ascending by sequence.
    blocks: Vec<SignedBlock>,
    /// Sequences that `execute_signed_block` must reject.
    reject_seqs: HashSet<u64>,
    unconfirmed: HashMap<Sha256, Transaction>,
    /// Hashes that violate a soft constraint on injection.
    soft_violations: HashSet<Sha256>,
    /// Returned (and drained) by the next `refresh_unconfirmed`.
    refresh_queue: Vec<Sha256>,
    /// Dropped (and drained) by the next `remove_invalid_unconfirmed`.
    remove_invalid_queue: Vec<Sha256>,
    announced: Vec<HashMap<Sha256, u64>>,
    is_master: bool,
}

/// A test visor.
#[derive(Default)]
pub struct NullVisor {
    state: Mutex<VisorState>,
}

impl NullVisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A visor whose chain already has blocks 0..=`head`.
    pub fn with_head(head: u64) -> Self {
        let visor = Self::new();
        {
            let mut state = visor.state.lock().unwrap();
            for seq in 0..=head {
                state.blocks.push(empty_block(seq));
            }
            state.head = Some(head);
        }
        visor
    }

    pub fn set_master(&self, is_master: bool) {
        self.state.lock().unwrap().is_master = is_master;
    }

    pub fn add_unconfirmed(&self, txn: Transaction) -> Sha256 {
        let hash = txn.hash();
        self.state.lock().unwrap().unconfirmed.insert(hash, txn);
        hash
    }

    pub fn mark_soft_violation(&self, hash: Sha256) {
        self.state.lock().unwrap().soft_violations.insert(hash);
    }

    pub fn reject_seq(&self, seq: u64) {
        self.state.lock().unwrap().reject_seqs.insert(seq);
    }

    pub fn script_refresh(&self, hashes: Vec<Sha256>) {
        self.state.lock().unwrap().refresh_queue = hashes;
    }

    pub fn script_remove_invalid(&self, hashes: Vec<Sha256>) {
        self.state.lock().unwrap().remove_invalid_queue = hashes;
    }

    // -- Assertion helpers -----------------------------------------------------

    pub fn executed_seqs(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .iter()
            .map(SignedBlock::seq)
            .collect()
    }

    pub fn announced(&self) -> Vec<HashMap<Sha256, u64>> {
        self.state.lock().unwrap().announced.clone()
    }

    pub fn unconfirmed_len(&self) -> usize {
        self.state.lock().unwrap().unconfirmed.len()
    }
}

fn empty_block(seq: u64) -> SignedBlock {
    SignedBlock {
        block: Block {
            head: BlockHeader {
                version: 1,
                seq,
                time: 1_700_000_000 + seq,
                prev_hash: Sha256::ZERO,
                body_hash: Sha256::ZERO,
            },
            body: Vec::new(),
        },
        sig: Sig::ZERO,
    }
}

impl Visor for NullVisor {
    fn head_bk_seq(&self) -> Result<Option<u64>, VisorError> {
        Ok(self.state.lock().unwrap().head)
    }

    fn get_signed_blocks_since(
        &self,
        seq: u64,
        count: u64,
    ) -> Result<Vec<SignedBlock>, VisorError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.seq() > seq)
            .take(count as usize)
            .cloned()
            .collect())
    }

    fn execute_signed_block(&self, b: SignedBlock) -> Result<(), VisorError> {
        let mut state = self.state.lock().unwrap();
        let seq = b.seq();
        if state.reject_seqs.contains(&seq) {
            return Err(VisorError::BlockRejected {
                seq,
                cause: "scripted rejection".to_string(),
            });
        }
        state.blocks.push(b);
        state.head = Some(state.head.map_or(seq, |h| h.max(seq)));
        Ok(())
    }

    fn create_and_execute_block(&self) -> Result<SignedBlock, VisorError> {
        let mut state = self.state.lock().unwrap();
        let seq = state.head.map_or(0, |h| h + 1);
        let sb = empty_block(seq);
        state.blocks.push(sb.clone());
        state.head = Some(seq);
        state.unconfirmed.clear();
        Ok(sb)
    }

    fn inject_transaction(&self, txn: Transaction) -> Result<TxnInjectResult, VisorError> {
        let mut state = self.state.lock().unwrap();
        let hash = txn.hash();
        let known = state.unconfirmed.contains_key(&hash);
        if !known {
            state.unconfirmed.insert(hash, txn);
        }
        let soft_violation = state
            .soft_violations
            .contains(&hash)
            .then(|| SoftConstraintViolation("insufficient fee".to_string()));
        Ok(TxnInjectResult {
            known,
            soft_violation,
        })
    }

    fn refresh_unconfirmed(&self) -> Result<Vec<Sha256>, VisorError> {
        Ok(std::mem::take(
            &mut self.state.lock().unwrap().refresh_queue,
        ))
    }

    fn remove_invalid_unconfirmed(&self) -> Result<Vec<Sha256>, VisorError> {
        let mut state = self.state.lock().unwrap();
        let removed = std::mem::take(&mut state.remove_invalid_queue);
        for h in &removed {
            state.unconfirmed.remove(h);
        }
        Ok(removed)
    }

    fn get_all_unconfirmed_transactions(&self) -> Result<Vec<Transaction>, VisorError> {
        let state = self.state.lock().unwrap();
        let mut txns: Vec<Transaction> = state.unconfirmed.values().cloned().collect();
        txns.sort_by_key(Transaction::hash);
        Ok(txns)
    }

    fn get_all_valid_unconfirmed_tx_hashes(&self) -> Result<Vec<Sha256>, VisorError> {
        let state = self.state.lock().unwrap();
        let mut hashes: Vec<Sha256> = state.unconfirmed.keys().copied().collect();
        hashes.sort();
        Ok(hashes)
    }

    fn get_unconfirmed_unknown(&self, hashes: &[Sha256]) -> Result<Vec<Sha256>, VisorError> {
        let state = self.state.lock().unwrap();
        Ok(hashes
            .iter()
            .filter(|h| !state.unconfirmed.contains_key(h))
            .copied()
            .collect())
    }

    fn get_unconfirmed_known(&self, hashes: &[Sha256]) -> Result<Vec<Transaction>, VisorError> {
        let state = self.state.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| state.unconfirmed.get(h).cloned())
            .collect())
    }

    fn set_transactions_announced(&self, txns: &HashMap<Sha256, u64>) -> Result<(), VisorError> {
        self.state.lock().unwrap().announced.push(txns.clone());
        Ok(())
    }

    fn is_master(&self) -> bool {
        self.state.lock().unwrap().is_master
    }
}
