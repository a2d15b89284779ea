//! Cache of transaction announcement times.
//!
//! Send-result handling runs outside the run loop, so this cache carries
//! its own mutex — the only piece of daemon state with one. Entries
//! accumulate between flush ticks; the run loop drains them in one batch
//! and hands the timestamps to the chain engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use obol_types::Sha256;

/// Buffers `txn hash → send time` pairs until the next flush.
#[derive(Default)]
pub struct AnnouncedTxns {
    txns: Mutex<HashMap<Sha256, u64>>,
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl AnnouncedTxns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record hashes as announced now. Re-adding a hash overwrites its time.
    pub fn add(&self, hashes: &[Sha256]) {
        self.add_at(hashes, unix_now_secs());
    }

    /// Record hashes with an explicit timestamp.
    pub fn add_at(&self, hashes: &[Sha256], now_secs: u64) {
        if hashes.is_empty() {
            return;
        }
        let mut txns = self.txns.lock().expect("announced txns lock poisoned");
        for h in hashes {
            txns.insert(*h, now_secs);
        }
    }

    /// Drain the cache, returning every buffered entry exactly once.
    pub fn flush(&self) -> HashMap<Sha256, u64> {
        let mut txns = self.txns.lock().expect("announced txns lock poisoned");
        std::mem::take(&mut *txns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_types::sha256;

    #[test]
    fn add_and_flush() {
        let cache = AnnouncedTxns::new();
        let h1 = sha256(b"1");
        let h2 = sha256(b"2");
        cache.add_at(&[h1, h2], 100);

        let flushed = cache.flush();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[&h1], 100);
        assert_eq!(flushed[&h2], 100);
    }

    #[test]
    fn duplicate_add_keeps_latest_time() {
        let cache = AnnouncedTxns::new();
        let h = sha256(b"1");
        cache.add_at(&[h], 100);
        cache.add_at(&[h], 200);

        let flushed = cache.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[&h], 200);
    }

    #[test]
    fn flush_returns_each_hash_at_most_once() {
        let cache = AnnouncedTxns::new();
        let h = sha256(b"1");
        cache.add_at(&[h], 100);
        assert_eq!(cache.flush().len(), 1);
        assert!(cache.flush().is_empty());

        // Until it is re-added.
        cache.add_at(&[h], 300);
        assert_eq!(cache.flush().len(), 1);
    }

    #[test]
    fn empty_add_is_noop() {
        let cache = AnnouncedTxns::new();
        cache.add_at(&[], 100);
        assert!(cache.flush().is_empty());
    }
}
