//! Public key and signature newtypes.
//!
//! The daemon core never verifies signatures itself — the chain engine does
//! — but introduction messages carry the blockchain public key and signed
//! blocks carry signatures, so both need stable serialized forms.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 33-byte compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKey(#[serde(with = "serde_bytes_33")] [u8; 33]);

impl PubKey {
    pub const ZERO: Self = Self([0u8; 33]);

    pub fn new(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    /// Parse a pubkey from a byte slice. Fails unless exactly 33 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 33] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 33]
    }
}

impl Default for PubKey {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A 65-byte recoverable signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Sig(#[serde(with = "serde_bytes_65")] [u8; 65]);

impl Sig {
    pub const ZERO: Self = Self([0u8; 65]);

    pub fn new(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl PartialEq for Sig {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for Sig {}

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

// Serde cannot derive for arrays past 32 elements without helpers; keep the
// wire form a plain fixed-length byte sequence.
macro_rules! fixed_bytes_serde {
    ($mod_name:ident, $len:expr) => {
        mod $mod_name {
            use serde::de::Error;
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(bytes: &[u8; $len], s: S) -> Result<S::Ok, S::Error> {
                s.serialize_bytes(bytes)
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; $len], D::Error> {
                let v: Vec<u8> = Vec::deserialize(d)?;
                v.try_into()
                    .map_err(|_| D::Error::custom(concat!("expected ", $len, " bytes")))
            }
        }
    };
}

fixed_bytes_serde!(serde_bytes_33, 33);
fixed_bytes_serde!(serde_bytes_65, 65);
