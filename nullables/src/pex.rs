//! Nullable peer directory — an in-memory peer map with deterministic
//! sampling.

use std::collections::HashMap;
use std::sync::Mutex;

use obol_daemon::{Peer, Pex, PexError};

#[derive(Default)]
struct PexState {
    peers: HashMap<String, Peer>,
    removed: Vec<String>,
    reset_all_calls: usize,
    disabled: bool,
    full: bool,
    shut_down: bool,
}

/// A test pex. "Random" selections are sorted by address so tests are
/// deterministic.
#[derive(Default)]
pub struct NullPex {
    state: Mutex<PexState>,
}

impl NullPex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a full peer record.
    pub fn put_peer(&self, peer: Peer) {
        self.state
            .lock()
            .unwrap()
            .peers
            .insert(peer.addr.clone(), peer);
    }

    pub fn set_full(&self, full: bool) {
        self.state.lock().unwrap().full = full;
    }

    // -- Assertion helpers -----------------------------------------------------

    pub fn retry_times(&self, addr: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .peers
            .get(addr)
            .map_or(0, |p| p.retry_times)
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn reset_all_calls(&self) -> usize {
        self.state.lock().unwrap().reset_all_calls
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }

    fn sorted(peers: Vec<Peer>) -> Vec<Peer> {
        let mut peers = peers;
        peers.sort_by(|a, b| a.addr.cmp(&b.addr));
        peers
    }
}

impl Pex for NullPex {
    fn random_public_untrusted(&self, n: usize) -> Vec<Peer> {
        let state = self.state.lock().unwrap();
        let peers = state
            .peers
            .values()
            .filter(|p| !p.trusted && !p.private)
            .cloned()
            .collect();
        Self::sorted(peers).into_iter().take(n).collect()
    }

    fn random_exchangeable(&self, n: usize) -> Vec<Peer> {
        let state = self.state.lock().unwrap();
        let peers = state
            .peers
            .values()
            .filter(|p| !p.private && p.has_incoming_port)
            .cloned()
            .collect();
        Self::sorted(peers).into_iter().take(n).collect()
    }

    fn trusted_public(&self) -> Vec<Peer> {
        let state = self.state.lock().unwrap();
        let peers = state
            .peers
            .values()
            .filter(|p| p.trusted && !p.private)
            .cloned()
            .collect();
        Self::sorted(peers)
    }

    fn trusted(&self) -> Vec<Peer> {
        let state = self.state.lock().unwrap();
        let peers = state.peers.values().filter(|p| p.trusted).cloned().collect();
        Self::sorted(peers)
    }

    fn private_peers(&self) -> Vec<Peer> {
        let state = self.state.lock().unwrap();
        let peers = state.peers.values().filter(|p| p.private).cloned().collect();
        Self::sorted(peers)
    }

    fn add_peer(&self, addr: &str) -> Result<(), PexError> {
        let mut state = self.state.lock().unwrap();
        if state.full {
            return Err(PexError::Full);
        }
        state
            .peers
            .entry(addr.to_string())
            .or_insert_with(|| Peer::new(addr));
        Ok(())
    }

    fn add_peers(&self, addrs: &[String]) -> usize {
        addrs.iter().filter(|a| self.add_peer(a).is_ok()).count()
    }

    fn get_peer(&self, addr: &str) -> Option<Peer> {
        self.state.lock().unwrap().peers.get(addr).cloned()
    }

    fn remove_peer(&self, addr: &str) {
        let mut state = self.state.lock().unwrap();
        state.peers.remove(addr);
        state.removed.push(addr.to_string());
    }

    fn set_has_incoming_port(&self, addr: &str, has: bool) -> Result<(), PexError> {
        let mut state = self.state.lock().unwrap();
        let peer = state
            .peers
            .get_mut(addr)
            .ok_or_else(|| PexError::PeerNotFound(addr.to_string()))?;
        peer.has_incoming_port = has;
        Ok(())
    }

    fn increase_retry_times(&self, addr: &str) {
        if let Some(p) = self.state.lock().unwrap().peers.get_mut(addr) {
            p.retry_times += 1;
        }
    }

    fn reset_retry_times(&self, addr: &str) {
        if let Some(p) = self.state.lock().unwrap().peers.get_mut(addr) {
            p.retry_times = 0;
        }
    }

    fn reset_all_retry_times(&self) {
        let mut state = self.state.lock().unwrap();
        state.reset_all_calls += 1;
        for p in state.peers.values_mut() {
            p.retry_times = 0;
        }
    }

    fn is_full(&self) -> bool {
        self.state.lock().unwrap().full
    }

    fn is_disabled(&self) -> bool {
        self.state.lock().unwrap().disabled
    }

    fn set_disabled(&self, disabled: bool) {
        self.state.lock().unwrap().disabled = disabled;
    }

    fn shutdown(&self) {
        self.state.lock().unwrap().shut_down = true;
    }
}
