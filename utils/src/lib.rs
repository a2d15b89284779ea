//! Shared utilities for the obol daemon.

pub mod elapse;
pub mod iputil;
pub mod logging;
pub mod signal;

pub use elapse::Elapser;
pub use logging::init_tracing;
