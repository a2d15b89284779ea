//! Inbound message dispatch.
//!
//! Each variant's effect is a function of the message, the originating
//! address, and the daemon capability. The handshake gate itself lives in
//! the run loop (the daemon decides whether a connection may speak);
//! everything after the gate is here.

use obol_messages::{GetBlocks, Introduction, Message};
use obol_types::{SignedBlock, Transaction};

use crate::daemoner::Daemoner;
use crate::error::DisconnectReason;

/// How many peers to return for a GetPeers request.
const GET_PEERS_REPLY_COUNT: usize = 30;

/// Apply a message's effect.
pub fn process_message(d: &mut dyn Daemoner, addr: &str, msg: Message) {
    match msg {
        Message::GetPeers => process_get_peers(d, addr),
        Message::GivePeers { peers } => {
            let addrs: Vec<String> = peers.iter().map(|p| p.key()).collect();
            let added = d.add_peers(&addrs);
            tracing::debug!(addr, received = addrs.len(), added, "received peers");
        }
        Message::Introduction(intro) => process_introduction(d, addr, &intro),
        Message::Ping => {
            if d.daemon_config().log_pings {
                tracing::debug!(addr, "received ping, replying with pong");
            }
            if let Err(e) = d.send_message(addr, Message::Pong) {
                tracing::warn!(addr, error = %e, "failed to send pong");
            }
        }
        Message::Pong => {
            if d.daemon_config().log_pings {
                tracing::debug!(addr, "received pong");
            }
        }
        Message::GetBlocks(m) => process_get_blocks(d, addr, &m),
        Message::GiveBlocks { blocks } => process_give_blocks(d, addr, blocks),
        Message::AnnounceBlocks { max_bk_seq } => process_announce_blocks(d, addr, max_bk_seq),
        Message::GetTxns { txns } => {
            let known = match d.get_unconfirmed_known(&txns) {
                Ok(known) => known,
                Err(e) => {
                    tracing::error!(addr, error = %e, "get_unconfirmed_known failed");
                    return;
                }
            };
            if known.is_empty() {
                return;
            }
            if let Err(e) = d.send_message(addr, Message::GiveTxns { txns: known }) {
                tracing::warn!(addr, error = %e, "failed to send transactions");
            }
        }
        Message::GiveTxns { txns } => process_give_txns(d, addr, txns),
        Message::AnnounceTxns { txns } => {
            let unknown = match d.get_unconfirmed_unknown(&txns) {
                Ok(unknown) => unknown,
                Err(e) => {
                    tracing::error!(addr, error = %e, "get_unconfirmed_unknown failed");
                    return;
                }
            };
            if unknown.is_empty() {
                return;
            }
            if let Err(e) = d.send_message(addr, Message::GetTxns { txns: unknown }) {
                tracing::warn!(addr, error = %e, "failed to request announced transactions");
            }
        }
    }
}

fn process_get_peers(d: &mut dyn Daemoner, addr: &str) {
    if d.pex_disabled() {
        return;
    }
    let peers = d.random_exchangeable(GET_PEERS_REPLY_COUNT);
    if peers.is_empty() {
        tracing::debug!(addr, "no peers to share");
        return;
    }
    let peers = peers
        .iter()
        .filter_map(|p| {
            obol_utils::iputil::split_addr(&p.addr).map(|(ip, port)| obol_messages::PeerAddr {
                ip,
                port,
            })
        })
        .collect();
    if let Err(e) = d.send_message(addr, Message::GivePeers { peers }) {
        tracing::warn!(addr, error = %e, "failed to send peers");
    }
}

fn process_introduction(d: &mut dyn Daemoner, addr: &str, intro: &Introduction) {
    let conn = match d.connection_introduced(addr, intro) {
        Ok(conn) => conn,
        Err(e) => {
            let reason = e.disconnect_reason();
            tracing::info!(addr, error = %e, %reason, "introduction rejected");
            if let Err(err) = d.disconnect_pool(addr, reason) {
                tracing::error!(addr, error = %err, "disconnect failed");
            }
            // A peer that handed us our own mirror is this process; its
            // directory entry is useless unless pinned as trusted.
            if reason == DisconnectReason::SelfConnect && !d.is_trusted_peer(addr) {
                d.remove_peer(addr);
            }
            return;
        }
    };

    tracing::debug!(
        addr,
        mirror = intro.mirror,
        listen_port = intro.listen_port,
        "peer introduced"
    );

    if conn.has_incoming_port {
        if let Err(e) = d.set_has_incoming_port(addr) {
            tracing::warn!(addr, error = %e, "set_has_incoming_port failed");
        }
    }
    d.reset_retry_times(addr);

    // Kick off sync with the freshly introduced peer.
    if let Err(e) = d.request_blocks_from_addr(addr) {
        tracing::warn!(addr, error = %e, "request blocks from introduced peer failed");
    }
    if let Err(e) = d.announce_all_txns() {
        tracing::warn!(addr, error = %e, "announce txns after introduction failed");
    }
}

fn process_get_blocks(d: &mut dyn Daemoner, addr: &str, m: &GetBlocks) {
    // The request tells us the peer's head.
    d.record_peer_height(addr, m.last_block);

    let count = m.request_blocks.min(d.daemon_config().blocks_response_count);
    let blocks = match d.get_signed_blocks_since(m.last_block, count) {
        Ok(blocks) => blocks,
        Err(e) => {
            tracing::error!(addr, error = %e, "get_signed_blocks_since failed");
            return;
        }
    };
    if blocks.is_empty() {
        return;
    }
    tracing::debug!(addr, count = blocks.len(), "responding with blocks");
    if let Err(e) = d.send_message(addr, Message::GiveBlocks { blocks }) {
        tracing::warn!(addr, error = %e, "failed to send blocks");
    }
}

fn process_give_blocks(d: &mut dyn Daemoner, addr: &str, mut blocks: Vec<SignedBlock>) {
    if blocks.is_empty() {
        return;
    }

    let max_seq = blocks.iter().map(SignedBlock::seq).max().unwrap_or(0);
    d.record_peer_height(addr, max_seq);

    blocks.sort_by_key(SignedBlock::seq);
    let mut processed = 0usize;
    for b in blocks {
        let seq = b.seq();
        if let Err(e) = d.execute_signed_block(b) {
            tracing::warn!(addr, seq, error = %e, "execute received block failed");
            break;
        }
        processed += 1;
    }
    if processed == 0 {
        return;
    }
    tracing::debug!(addr, processed, "executed received blocks");

    // Let everyone know where our head is now.
    match d.head_bk_seq() {
        Ok(Some(head)) => {
            if let Err(e) = d.broadcast_message(Message::AnnounceBlocks { max_bk_seq: head }) {
                tracing::debug!(error = %e, "broadcast announce after blocks failed");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "head_bk_seq failed"),
    }
}

fn process_announce_blocks(d: &mut dyn Daemoner, addr: &str, max_bk_seq: u64) {
    let head = match d.head_bk_seq() {
        Ok(Some(head)) => head,
        Ok(None) => {
            tracing::error!(addr, "cannot process block announcement, there is no head block");
            return;
        }
        Err(e) => {
            tracing::error!(addr, error = %e, "head_bk_seq failed");
            return;
        }
    };
    if max_bk_seq <= head {
        return;
    }

    let m = Message::GetBlocks(GetBlocks {
        last_block: head,
        request_blocks: d.daemon_config().blocks_response_count,
    });
    if let Err(e) = d.send_message(addr, m) {
        tracing::warn!(addr, error = %e, "failed to request announced blocks");
    }
}

fn process_give_txns(d: &mut dyn Daemoner, addr: &str, txns: Vec<Transaction>) {
    let mut fresh = Vec::new();
    for txn in txns {
        let hash = txn.hash();
        match d.inject_transaction(txn) {
            Ok(result) => {
                if let Some(violation) = result.soft_violation {
                    tracing::debug!(addr, txn = %hash, violation = %violation.0,
                        "transaction injected with soft constraint violation");
                }
                if !result.known {
                    fresh.push(hash);
                }
            }
            Err(e) => {
                tracing::warn!(addr, txn = %hash, error = %e, "transaction rejected");
            }
        }
    }
    if fresh.is_empty() {
        return;
    }
    if let Err(e) = d.broadcast_message(Message::AnnounceTxns { txns: fresh }) {
        tracing::debug!(error = %e, "broadcast announce after inject failed");
    }
}
