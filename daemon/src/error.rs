//! Daemon error types and disconnect reason codes.

use thiserror::Error;

use crate::connections::ConnectionsError;
use crate::pex::PexError;
use crate::pool::PoolError;
use crate::visor::VisorError;

/// Why a connection was (or is being) torn down. Passed to the pool's
/// disconnect call and echoed back in the disconnect event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Version is below the minimum supported version.
    VersionNotSupported,
    /// The peer never sent an introduction.
    IntroductionTimeout,
    /// Sending our introduction failed.
    VersionSendFailed,
    Blacklisted,
    /// The introduction carried our own mirror.
    SelfConnect,
    /// Another live connection already holds this mirror.
    ConnectedTwice,
    Idle,
    /// The first message was not an introduction.
    NoIntroduction,
    /// Too many connections from this base IP.
    IpLimitReached,
    /// A seemingly impossible error was encountered.
    IncomprehensibleError,
    MaxOutgoingConnectionsReached,
    /// The blockchain pubkey in the introduction does not match ours.
    BlockchainPubkeyNotMatched,
    /// The introduction extra field could not be parsed.
    InvalidExtraData,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::VersionNotSupported => "version is below minimum supported version",
            Self::IntroductionTimeout => "introduction timeout",
            Self::VersionSendFailed => "introduction send failed",
            Self::Blacklisted => "blacklisted",
            Self::SelfConnect => "self connect",
            Self::ConnectedTwice => "already connected",
            Self::Idle => "idle",
            Self::NoIntroduction => "first message was not an introduction",
            Self::IpLimitReached => "maximum number of connections for this IP was reached",
            Self::IncomprehensibleError => "incomprehensible error",
            Self::MaxOutgoingConnectionsReached => "maximum outgoing connections was reached",
            Self::BlockchainPubkeyNotMatched => {
                "blockchain pubkey in introduction does not match"
            }
            Self::InvalidExtraData => "introduction extra data is invalid",
        };
        f.write_str(s)
    }
}

/// Errors produced by the daemon core.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("outgoing connections are disabled")]
    OutgoingConnectionsDisabled,

    #[error("networking is disabled")]
    NetworkingDisabled,

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("already connected to a peer with this base IP: {0}")]
    IpAlreadyUsed(String),

    #[error("peer is not localhost")]
    NotLocalhost,

    #[error("there is no head block")]
    NoHeadBlock,

    #[error("daemon run loop is already running")]
    AlreadyRunning,

    #[error("config error: {0}")]
    Config(String),

    #[error("connection table error: {0}")]
    Connections(#[from] ConnectionsError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("pex error: {0}")]
    Pex(#[from] PexError),

    #[error("chain engine error: {0}")]
    Visor(#[from] VisorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_have_distinct_display() {
        let reasons = [
            DisconnectReason::VersionNotSupported,
            DisconnectReason::IntroductionTimeout,
            DisconnectReason::SelfConnect,
            DisconnectReason::ConnectedTwice,
            DisconnectReason::NoIntroduction,
            DisconnectReason::IpLimitReached,
            DisconnectReason::MaxOutgoingConnectionsReached,
            DisconnectReason::BlockchainPubkeyNotMatched,
            DisconnectReason::InvalidExtraData,
        ];
        let mut seen = std::collections::HashSet::new();
        for r in reasons {
            assert!(seen.insert(r.to_string()), "duplicate display for {r:?}");
        }
    }
}
