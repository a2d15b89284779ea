//! Nullable infrastructure for deterministic daemon testing.
//!
//! The daemon's collaborators (the socket pool, the peer directory, the
//! chain engine) are abstracted behind traits. This crate provides
//! test-friendly implementations that:
//! - return deterministic values
//! - can be controlled programmatically
//! - never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod pex;
pub mod pool;
pub mod visor;

pub use pex::NullPex;
pub use pool::NullPool;
pub use visor::NullVisor;
