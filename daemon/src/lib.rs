//! The obol networking daemon core.
//!
//! This crate is the peer-lifecycle and event-dispatch engine of a full
//! node: the connection state machine, the serialized run loop that fans
//! in timers, pool events, send results, inbound messages, and gateway
//! requests, the outgoing-connection solicitor, and the
//! introduction-handshake gate.
//!
//! The socket pool, the peer directory (pex), and the chain engine
//! (visor) are external collaborators reached through the narrow traits
//! declared here; `obol_nullables` provides in-memory implementations for
//! tests.

pub mod announced_txns;
pub mod config;
pub mod connections;
pub mod daemon;
pub mod daemoner;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gateway;
pub mod metrics;
pub mod pex;
pub mod pool;
pub mod shutdown;
pub mod visor;

pub use announced_txns::AnnouncedTxns;
pub use config::DaemonConfig;
pub use connections::{Connection, ConnectionState, Connections};
pub use daemon::{divide_hashes, Daemon, DaemonHandles};
pub use daemoner::Daemoner;
pub use error::{DaemonError, DisconnectReason};
pub use events::{EventSender, SendResult};
pub use gateway::{Gateway, GatewayError};
pub use metrics::DaemonMetrics;
pub use pex::{Peer, Pex, PexError};
pub use pool::{Pool, PoolError};
pub use shutdown::ShutdownCoordinator;
pub use visor::{SoftConstraintViolation, TxnInjectResult, Visor, VisorError};
