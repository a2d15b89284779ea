//! In-memory registry of per-peer connection state.
//!
//! Every row moves along `Pending → Connected → Introduced`; there are no
//! back transitions, and removal is the only exit. The table is mutated
//! exclusively from the daemon run loop, so it needs no interior locking.
//!
//! Alongside the address index the table keeps a base-IP counter (for the
//! per-IP admission cap) and a mirror index (for duplicate- and
//! self-connection detection). Both are maintained on every insert and
//! remove so reads are O(1).

use std::collections::HashMap;

use thiserror::Error;
use tokio::time::Instant;

use obol_messages::Introduction;
use obol_types::PubKey;

use crate::error::DisconnectReason;

/// Handshake progress of a single connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// An outgoing dial has been issued but has not completed.
    Pending,
    /// The socket is up; an introduction has not been exchanged yet.
    Connected,
    /// The introduction handshake completed.
    Introduced,
}

/// Metadata for one peer connection, keyed by `"ip:port"`.
#[derive(Clone, Debug, PartialEq)]
pub struct Connection {
    pub addr: String,
    pub state: ConnectionState,
    /// Whether we initiated this connection. Set once at row creation.
    pub outgoing: bool,
    /// When the socket came up. `None` while pending.
    pub connected_at: Option<Instant>,
    /// The remote's mirror. Zero until introduced.
    pub mirror: u32,
    /// The port the remote accepts inbound connections on. Zero until
    /// introduced, and zero afterwards if the remote declared none.
    pub listen_port: u16,
    pub protocol_version: u32,
    /// Highest chain head the peer has reported. Mutable after introduction.
    pub height: u64,
    pub has_incoming_port: bool,
}

impl Connection {
    pub fn has_introduced(&self) -> bool {
        self.state == ConnectionState::Introduced
    }
}

/// Structural errors from table operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionsError {
    #[error("connection {0} already exists")]
    AlreadyExists(String),

    #[error("connection {0} does not exist")]
    NotFound(String),

    #[error("connection {addr} is {actual:?}, expected {expected:?}")]
    UnexpectedState {
        addr: String,
        actual: ConnectionState,
        expected: ConnectionState,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Introduction-handshake validation failures. Each maps to the disconnect
/// reason the caller should pass to the pool.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntroducedError {
    #[error("connection does not exist")]
    NotFound,

    #[error("connection has not completed the connect step")]
    NotConnected,

    #[error("introduction mirror is zero")]
    InvalidMirror,

    #[error("introduction mirror matches our own")]
    SelfConnect,

    #[error("another connection already holds this mirror")]
    ConnectedTwice,

    #[error("introduction extra data is malformed")]
    InvalidExtraData,

    #[error("blockchain pubkey does not match ours")]
    BlockchainPubkeyNotMatched,

    #[error("protocol version is below the minimum")]
    VersionNotSupported,
}

impl IntroducedError {
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::NotFound | Self::NotConnected | Self::InvalidMirror => {
                DisconnectReason::IncomprehensibleError
            }
            Self::SelfConnect => DisconnectReason::SelfConnect,
            Self::ConnectedTwice => DisconnectReason::ConnectedTwice,
            Self::InvalidExtraData => DisconnectReason::InvalidExtraData,
            Self::BlockchainPubkeyNotMatched => DisconnectReason::BlockchainPubkeyNotMatched,
            Self::VersionNotSupported => DisconnectReason::VersionNotSupported,
        }
    }
}

/// Everything `introduced` needs to validate a handshake against local
/// state.
pub struct IntroductionContext {
    pub our_mirror: u32,
    pub our_pubkey: PubKey,
    pub min_protocol_version: u32,
}

/// The connection table.
#[derive(Default)]
pub struct Connections {
    conns: HashMap<String, Connection>,
    /// Live connection count per base IP.
    ip_counts: HashMap<String, usize>,
    /// Mirror → address, for introduced rows only.
    mirrors: HashMap<u32, String>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` row for an outgoing dial.
    pub fn pending(&mut self, addr: &str) -> Result<&Connection, ConnectionsError> {
        if self.conns.contains_key(addr) {
            return Err(ConnectionsError::AlreadyExists(addr.to_string()));
        }
        let (ip, _) = obol_utils::iputil::split_addr(addr)
            .ok_or_else(|| ConnectionsError::InvalidAddress(addr.to_string()))?;

        *self.ip_counts.entry(ip).or_insert(0) += 1;
        let conn = Connection {
            addr: addr.to_string(),
            state: ConnectionState::Pending,
            outgoing: true,
            connected_at: None,
            mirror: 0,
            listen_port: 0,
            protocol_version: 0,
            height: 0,
            has_incoming_port: false,
        };
        Ok(self.conns.entry(addr.to_string()).or_insert(conn))
    }

    /// Advance a `Pending` row to `Connected`, or create a `Connected` row
    /// for an accepted inbound connection.
    pub fn connected(&mut self, addr: &str, now: Instant) -> Result<&Connection, ConnectionsError> {
        match self.conns.get(addr).map(|c| c.state) {
            Some(state) if state != ConnectionState::Pending => {
                return Err(ConnectionsError::UnexpectedState {
                    addr: addr.to_string(),
                    actual: state,
                    expected: ConnectionState::Pending,
                });
            }
            Some(_) => {
                let conn = self.conns.get_mut(addr).expect("row checked above");
                conn.state = ConnectionState::Connected;
                conn.connected_at = Some(now);
                return Ok(conn);
            }
            None => {}
        }

        let (ip, _) = obol_utils::iputil::split_addr(addr)
            .ok_or_else(|| ConnectionsError::InvalidAddress(addr.to_string()))?;
        *self.ip_counts.entry(ip).or_insert(0) += 1;
        let conn = Connection {
            addr: addr.to_string(),
            state: ConnectionState::Connected,
            outgoing: false,
            connected_at: Some(now),
            mirror: 0,
            listen_port: 0,
            protocol_version: 0,
            height: 0,
            has_incoming_port: false,
        };
        Ok(self.conns.entry(addr.to_string()).or_insert(conn))
    }

    /// Validate an introduction and advance the row to `Introduced`.
    ///
    /// Checks, in order: the row exists and is `Connected`; the remote
    /// mirror is non-zero, not our own, and not held by any other row; the
    /// extra field parses; the declared pubkey (if any) matches ours; the
    /// protocol version meets the minimum.
    pub fn introduced(
        &mut self,
        addr: &str,
        ctx: &IntroductionContext,
        intro: &Introduction,
    ) -> Result<&Connection, IntroducedError> {
        {
            let conn = self.conns.get(addr).ok_or(IntroducedError::NotFound)?;
            if conn.state != ConnectionState::Connected {
                return Err(IntroducedError::NotConnected);
            }
        }

        if intro.mirror == 0 {
            return Err(IntroducedError::InvalidMirror);
        }
        if intro.mirror == ctx.our_mirror {
            return Err(IntroducedError::SelfConnect);
        }
        // The mirror index holds only earlier arrivals, so the row being
        // introduced now is always the one rejected.
        if let Some(holder) = self.mirrors.get(&intro.mirror) {
            if holder != addr {
                return Err(IntroducedError::ConnectedTwice);
            }
        }

        let declared = intro
            .blockchain_pubkey()
            .map_err(|_| IntroducedError::InvalidExtraData)?;
        if let Some(pk) = declared {
            if pk != ctx.our_pubkey {
                return Err(IntroducedError::BlockchainPubkeyNotMatched);
            }
        }

        if intro.protocol_version < ctx.min_protocol_version {
            return Err(IntroducedError::VersionNotSupported);
        }

        self.mirrors.insert(intro.mirror, addr.to_string());
        let conn = self.conns.get_mut(addr).expect("row checked above");
        conn.state = ConnectionState::Introduced;
        conn.mirror = intro.mirror;
        conn.listen_port = intro.listen_port;
        conn.protocol_version = intro.protocol_version;
        conn.has_incoming_port = intro.listen_port != 0;
        Ok(conn)
    }

    /// Delete a row and release its IP and mirror slots.
    ///
    /// Returns a soft error on absent rows; callers only log it, because a
    /// disconnect may race a removal that already happened.
    pub fn remove(&mut self, addr: &str) -> Result<(), ConnectionsError> {
        let conn = self
            .conns
            .remove(addr)
            .ok_or_else(|| ConnectionsError::NotFound(addr.to_string()))?;

        if let Some((ip, _)) = obol_utils::iputil::split_addr(addr) {
            if let Some(count) = self.ip_counts.get_mut(&ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ip_counts.remove(&ip);
                }
            }
        }
        if conn.mirror != 0 {
            if let Some(holder) = self.mirrors.get(&conn.mirror) {
                if holder == addr {
                    self.mirrors.remove(&conn.mirror);
                }
            }
        }
        Ok(())
    }

    /// Record the peer's latest reported chain head. Only valid after the
    /// handshake completed.
    pub fn set_height(&mut self, addr: &str, height: u64) -> Result<(), ConnectionsError> {
        let conn = self
            .conns
            .get_mut(addr)
            .ok_or_else(|| ConnectionsError::NotFound(addr.to_string()))?;
        if conn.state != ConnectionState::Introduced {
            return Err(ConnectionsError::UnexpectedState {
                addr: addr.to_string(),
                actual: conn.state,
                expected: ConnectionState::Introduced,
            });
        }
        conn.height = height;
        Ok(())
    }

    // -- Read-only views -------------------------------------------------------

    pub fn get(&self, addr: &str) -> Option<&Connection> {
        self.conns.get(addr)
    }

    /// Live connections sharing this base IP.
    pub fn ip_count(&self, ip: &str) -> usize {
        self.ip_counts.get(ip).copied().unwrap_or(0)
    }

    /// Number of outgoing rows, in any state.
    pub fn outgoing_len(&self) -> usize {
        self.conns.values().filter(|c| c.outgoing).count()
    }

    /// Number of rows still waiting for a dial to complete.
    pub fn pending_len(&self) -> usize {
        self.conns
            .values()
            .filter(|c| c.state == ConnectionState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Snapshot of every row.
    pub fn all(&self) -> Vec<Connection> {
        self.conns.values().cloned().collect()
    }

    /// Sum of all per-IP counts; equals `len()` by construction.
    #[cfg(test)]
    fn ip_count_total(&self) -> usize {
        self.ip_counts.values().sum()
    }
}
