//! Daemon configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use obol_types::PubKey;

use crate::error::DaemonError;

/// Configuration for the daemon core.
///
/// Can be loaded from a TOML file via [`DaemonConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Call [`preprocess`] before
/// handing it to the daemon.
///
/// [`preprocess`]: DaemonConfig::preprocess
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Protocol version sent in our introduction.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,

    /// Minimum protocol version accepted from peers.
    #[serde(default = "default_protocol_version")]
    pub min_protocol_version: u32,

    /// IP address to serve on. Empty for automatic assignment.
    #[serde(default)]
    pub address: String,

    /// TCP port for connections; advertised in our introduction.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The blockchain pubkey peers must declare (when they declare one).
    #[serde(skip)]
    pub blockchain_pubkey: PubKey,

    /// How often to check and initiate an outgoing connection if needed.
    #[serde(default = "default_five")]
    pub outgoing_rate_secs: u64,

    /// How often to re-attempt any missing private connections.
    #[serde(default = "default_five")]
    pub private_rate_secs: u64,

    /// Number of outgoing connections to maintain.
    #[serde(default = "default_eight")]
    pub outgoing_max: usize,

    /// Maximum number of dials in flight at once.
    #[serde(default = "default_eight")]
    pub pending_max: usize,

    /// How long to wait for an introduction after connecting.
    #[serde(default = "default_introduction_wait")]
    pub introduction_wait_secs: u64,

    /// How often to sweep for peers that never introduced themselves.
    #[serde(default = "default_three")]
    pub cull_invalid_rate_secs: u64,

    /// How often to flush transaction announcement times to the chain
    /// engine.
    #[serde(default = "default_three")]
    pub flush_announced_txns_rate_secs: u64,

    /// How many connections are allowed from the same base IP.
    #[serde(default = "default_ip_counts_max")]
    pub ip_counts_max: usize,

    /// Disable all networking activity.
    #[serde(default)]
    pub disable_networking: bool,

    /// Don't make outgoing connections.
    #[serde(default)]
    pub disable_outgoing_connections: bool,

    /// Don't allow incoming connections.
    #[serde(default)]
    pub disable_incoming_connections: bool,

    /// Run on localhost and only connect to localhost peers.
    #[serde(default)]
    pub localhost_only: bool,

    /// Log ping and pong messages.
    #[serde(default = "default_true")]
    pub log_pings: bool,

    /// How often to request blocks from peers.
    #[serde(default = "default_sixty")]
    pub blocks_request_rate_secs: u64,

    /// How often to announce our head to peers.
    #[serde(default = "default_sixty")]
    pub blocks_announce_rate_secs: u64,

    /// How many blocks to return for a blocks request.
    #[serde(default = "default_blocks_response_count")]
    pub blocks_response_count: u64,

    /// Maximum transaction hashes per announce message.
    #[serde(default = "default_max_txn_announce_num")]
    pub max_txn_announce_num: usize,

    /// How often the signing node creates new blocks.
    #[serde(default = "default_block_creation_interval")]
    pub block_creation_interval_secs: u64,

    /// How often to promote unconfirmed transactions that became valid.
    #[serde(default = "default_sixty")]
    pub unconfirmed_refresh_rate_secs: u64,

    /// How often to drop unconfirmed transactions that became permanently
    /// invalid.
    #[serde(default = "default_sixty")]
    pub unconfirmed_remove_invalid_rate_secs: u64,

    /// How often pex is asked for fresh peers.
    #[serde(default = "default_sixty")]
    pub request_peers_rate_secs: u64,

    /// How often the pool drops stale connections.
    #[serde(default = "default_sixty")]
    pub clear_stale_rate_secs: u64,

    /// How often the pool sends keep-alive pings.
    #[serde(default = "default_sixty")]
    pub idle_check_rate_secs: u64,

    /// Default "trusted" peers. The host registers these in pex as
    /// trusted before the daemon starts; the startup dial draws from
    /// pex's trusted set.
    #[serde(default)]
    pub default_connections: Vec<String>,

    /// The pool's connection bound; sizes the event channels.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// The pool's event channel size; sizes the message-event channel.
    #[serde(default = "default_event_channel_size")]
    pub event_channel_size: usize,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_protocol_version() -> u32 {
    2
}

fn default_port() -> u16 {
    6677
}

fn default_three() -> u64 {
    3
}

fn default_five() -> u64 {
    5
}

fn default_sixty() -> u64 {
    60
}

fn default_eight() -> usize {
    8
}

fn default_introduction_wait() -> u64 {
    30
}

fn default_ip_counts_max() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_blocks_response_count() -> u64 {
    20
}

fn default_max_txn_announce_num() -> usize {
    16
}

fn default_block_creation_interval() -> u64 {
    10
}

fn default_max_connections() -> usize {
    128
}

fn default_event_channel_size() -> usize {
    4096
}

// ── Impl ───────────────────────────────────────────────────────────────

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, DaemonError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DaemonError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, DaemonError> {
        toml::from_str(s).map_err(|e| DaemonError::Config(e.to_string()))
    }

    /// Normalize the configuration.
    ///
    /// Localhost-only mode defaults and validates the bind address;
    /// disabling networking forces both per-direction disables. The daemon
    /// additionally disables pex when networking is disabled.
    pub fn preprocess(&mut self) -> Result<(), DaemonError> {
        if self.localhost_only {
            if self.address.is_empty() {
                self.address = obol_utils::iputil::localhost_ip();
            } else if !obol_utils::iputil::is_localhost(&self.address) {
                return Err(DaemonError::Config(format!(
                    "invalid address for localhost-only: {}",
                    self.address
                )));
            }
        }

        if self.disable_networking {
            tracing::info!("networking is disabled");
            self.disable_incoming_connections = true;
            self.disable_outgoing_connections = true;
        } else {
            if self.disable_incoming_connections {
                tracing::info!("incoming connections are disabled");
            }
            if self.disable_outgoing_connections {
                tracing::info!("outgoing connections are disabled");
            }
        }

        Ok(())
    }

    pub fn introduction_wait(&self) -> Duration {
        Duration::from_secs(self.introduction_wait_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config uses defaults")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.protocol_version, 2);
        assert_eq!(config.min_protocol_version, 2);
        assert_eq!(config.port, 6677);
        assert_eq!(config.outgoing_max, 8);
        assert_eq!(config.pending_max, 8);
        assert_eq!(config.ip_counts_max, 3);
        assert_eq!(config.introduction_wait_secs, 30);
        assert_eq!(config.cull_invalid_rate_secs, 3);
        assert_eq!(config.blocks_response_count, 20);
        assert_eq!(config.max_txn_announce_num, 16);
        assert!(config.log_pings);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            outgoing_max = 16
            localhost_only = true
        "#;
        let config = DaemonConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.outgoing_max, 16);
        assert!(config.localhost_only);
        assert_eq!(config.port, 6677); // default
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = DaemonConfig::from_toml_file("/nonexistent/obol.toml");
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn preprocess_defaults_localhost_address() {
        let mut config = DaemonConfig {
            localhost_only: true,
            ..Default::default()
        };
        config.preprocess().unwrap();
        assert_eq!(config.address, "127.0.0.1");
    }

    #[test]
    fn preprocess_rejects_public_address_in_localhost_mode() {
        let mut config = DaemonConfig {
            localhost_only: true,
            address: "8.8.8.8".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.preprocess(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn disable_networking_forces_both_directions() {
        let mut config = DaemonConfig {
            disable_networking: true,
            ..Default::default()
        };
        config.preprocess().unwrap();
        assert!(config.disable_incoming_connections);
        assert!(config.disable_outgoing_connections);
    }
}
