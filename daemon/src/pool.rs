//! The socket pool, as consumed by the daemon.
//!
//! The pool owns sockets, frames messages, and reports connects,
//! disconnects, inbound messages, and send results through the
//! [`EventSender`](crate::events::EventSender) it is handed at wiring time.
//! The daemon treats it as a thread-safe opaque service; every method here
//! may be called from the run loop or from a dial worker.

use thiserror::Error;

use obol_messages::Message;

use crate::error::DisconnectReason;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool is shut down")]
    Closed,

    #[error("no connection to {0}")]
    NoSuchConnection(String),

    #[error("dial to {addr} failed: {cause}")]
    DialFailed { addr: String, cause: String },

    #[error("send to {addr} failed: {cause}")]
    SendFailed { addr: String, cause: String },

    #[error("{0}")]
    Other(String),
}

/// Narrow surface of the socket pool.
pub trait Pool: Send + Sync {
    /// Dial `addr`. Blocks until the connection is established or fails;
    /// the daemon runs this on a short-lived worker. A successful dial is
    /// reported back through the pool's connect event.
    fn connect(&self, addr: &str) -> Result<(), PoolError>;

    /// Tear down the connection to `addr`. The pool echoes the reason back
    /// through its disconnect event.
    fn disconnect(&self, addr: &str, reason: DisconnectReason) -> Result<(), PoolError>;

    /// Queue a message for one connection. The outcome arrives on the
    /// send-results stream.
    fn send_message(&self, addr: &str, msg: Message) -> Result<(), PoolError>;

    /// Queue a message for every live connection.
    fn broadcast_message(&self, msg: Message) -> Result<(), PoolError>;

    /// Number of live connections.
    fn size(&self) -> Result<usize, PoolError>;

    /// Number of live connections we dialed.
    fn outgoing_connections_num(&self) -> Result<usize, PoolError>;

    /// Whether the pool holds a pending or live connection for `addr`.
    fn is_conn_exist(&self, addr: &str) -> Result<bool, PoolError>;

    /// Whether `addr` is one of the hardcoded default connections.
    fn is_default_connection(&self, addr: &str) -> bool;

    /// Whether the allowed number of default connections is saturated.
    fn is_max_default_connections_reached(&self) -> Result<bool, PoolError>;

    /// Drop connections idle beyond the pool's stale threshold.
    fn clear_stale_connections(&self) -> Result<(), PoolError>;

    /// Send keep-alive pings where needed.
    fn send_pings(&self) -> Result<(), PoolError>;

    /// Stop accepting and dialing; close all sockets. May block.
    fn shutdown(&self);
}
