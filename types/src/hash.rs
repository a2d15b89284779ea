//! SHA-256 digest newtype used for transaction and block identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256 as Sha256Hasher};
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256([u8; 32]);

impl Sha256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Hash a byte slice with SHA-256.
pub fn sha256(data: &[u8]) -> Sha256 {
    let mut hasher = Sha256Hasher::new();
    hasher.update(data);
    Sha256(hasher.finalize().into())
}

/// Hash several byte slices as one message.
pub fn sha256_multi(parts: &[&[u8]]) -> Sha256 {
    let mut hasher = Sha256Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Sha256(hasher.finalize().into())
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_deterministic() {
        let h1 = sha256(b"hello obol");
        let h2 = sha256(b"hello obol");
        assert_eq!(h1, h2);
        assert!(!h1.is_zero());
    }

    #[test]
    fn sha256_multi_matches_concatenation() {
        let joined = sha256(b"abcdef");
        let parts = sha256_multi(&[b"abc", b"def"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn zero_is_zero() {
        assert!(Sha256::ZERO.is_zero());
        assert!(!sha256(b"x").is_zero());
    }

    #[test]
    fn display_is_hex() {
        let h = Sha256::new([0xab; 32]);
        assert_eq!(h.to_string(), "ab".repeat(32));
    }
}
