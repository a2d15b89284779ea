//! Fundamental types for the obol daemon.
//!
//! This crate defines the primitives shared across the workspace: digests,
//! keys, blocks, and transactions. Everything here is serde-derived so that
//! the socket pool can frame it with bincode.

pub mod block;
pub mod hash;
pub mod keys;
pub mod transaction;

pub use block::{Block, BlockHeader, SignedBlock};
pub use hash::{sha256, sha256_multi, Sha256};
pub use keys::{PubKey, Sig};
pub use transaction::{Transaction, TransactionOutput};
