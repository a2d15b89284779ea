//! Integration tests exercising the daemon end-to-end: events flow in
//! through the pool's sender, the run loop mutates the connection table,
//! and effects land in the nullable pool, pex, and visor.

use std::sync::Arc;
use std::time::Duration;

use obol_daemon::{
    ConnectionState, Daemon, DaemonConfig, DaemonError, DaemonHandles, DisconnectReason, Peer,
    Pex, Pool, Visor,
};
use obol_messages::{Introduction, Message};
use obol_nullables::{NullPex, NullPool, NullVisor};
use obol_types::{sha256, PubKey, Transaction};

const PUBKEY: [u8; 33] = [5u8; 33];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    handles: DaemonHandles,
    pool: Arc<NullPool>,
    pex: Arc<NullPex>,
    visor: Arc<NullVisor>,
    task: tokio::task::JoinHandle<Result<(), DaemonError>>,
}

fn test_config() -> DaemonConfig {
    DaemonConfig {
        blockchain_pubkey: PubKey::new(PUBKEY),
        ..Default::default()
    }
}

fn start(config: DaemonConfig) -> Harness {
    start_with(
        config,
        Arc::new(NullPool::new()),
        Arc::new(NullPex::new()),
        Arc::new(NullVisor::with_head(0)),
    )
}

fn start_with(
    config: DaemonConfig,
    pool: Arc<NullPool>,
    pex: Arc<NullPex>,
    visor: Arc<NullVisor>,
) -> Harness {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| obol_utils::init_tracing("warn"));

    let pool_dyn: Arc<dyn Pool> = pool.clone();
    let pex_dyn: Arc<dyn Pex> = pex.clone();
    let visor_dyn: Arc<dyn Visor> = visor.clone();
    let (mut daemon, handles) =
        Daemon::new(config, pool_dyn, pex_dyn, visor_dyn).expect("daemon construction failed");
    pool.set_events(handles.events.clone());
    let task = tokio::spawn(async move { daemon.run().await });
    Harness {
        handles,
        pool,
        pex,
        visor,
        task,
    }
}

/// Poll until the condition holds; panics after ~5 simulated seconds.
async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn intro(mirror: u32, listen_port: u16) -> Message {
    Message::Introduction(Introduction {
        mirror,
        listen_port,
        protocol_version: 2,
        extra: PUBKEY.to_vec(),
    })
}

async fn connection_state(harness: &Harness, addr: &str) -> Option<ConnectionState> {
    harness
        .handles
        .gateway
        .connections()
        .await
        .expect("gateway closed")
        .into_iter()
        .find(|c| c.addr == addr)
        .map(|c| c.state)
}

// ---------------------------------------------------------------------------
// S1: introduction happy path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn introduction_happy_path() {
    let addr = "10.0.0.2:7777";
    let harness = start(test_config());

    let mut peer = Peer::new(addr);
    peer.retry_times = 3;
    harness.pex.put_peer(peer);

    // Accept an inbound connection.
    harness.pool.add_connection(addr);
    harness.handles.events.connected(addr, false).await;

    // Our introduction goes out first.
    wait_for("introduction sent", || {
        harness
            .pool
            .sent()
            .iter()
            .any(|(a, m)| a == addr && matches!(m, Message::Introduction(_)))
    })
    .await;
    let our_mirror = harness.handles.gateway.mirror().await.unwrap();
    let sent = harness.pool.sent();
    let Message::Introduction(ours) = &sent[0].1 else {
        panic!("first send was not an introduction");
    };
    assert_eq!(ours.mirror, our_mirror);
    assert_eq!(ours.listen_port, 6677);
    assert_eq!(ours.extra, PUBKEY.to_vec());

    // The peer introduces itself. Introduction processing flips the pex
    // flags, which are observable synchronously.
    harness
        .handles
        .events
        .message(addr, intro(0xB2B2_B2B2, 6677))
        .await;

    wait_for("peer introduced", || {
        harness
            .pex
            .get_peer(addr)
            .is_some_and(|p| p.has_incoming_port && p.retry_times == 0)
    })
    .await;
    assert_eq!(
        connection_state(&harness, addr).await,
        Some(ConnectionState::Introduced)
    );

    harness.handles.shutdown.shutdown().await;
    harness.task.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// S2: self-connect detection
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn self_connect_is_disconnected_and_untrusted_peer_removed() {
    let addr = "127.0.0.1:6677";
    let harness = start(test_config());
    harness.pex.put_peer(Peer::new(addr));

    // Dial the peer; the nullable pool reports the connect event itself.
    harness
        .handles
        .gateway
        .connect(addr.to_string())
        .await
        .unwrap()
        .unwrap();

    wait_for("introduction sent", || {
        harness
            .pool
            .sent()
            .iter()
            .any(|(a, m)| a == addr && matches!(m, Message::Introduction(_)))
    })
    .await;

    // The peer echoes our own mirror back.
    let our_mirror = harness.handles.gateway.mirror().await.unwrap();
    harness
        .handles
        .events
        .message(addr, intro(our_mirror, 6677))
        .await;

    wait_for("self disconnect", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(a, r)| a == addr && *r == DisconnectReason::SelfConnect)
    })
    .await;
    wait_for("pex entry removed", || {
        harness.pex.removed().iter().any(|a| a == addr)
    })
    .await;

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn self_connect_keeps_trusted_peer_in_pex() {
    let addr = "127.0.0.1:6677";
    let harness = start(test_config());
    let mut peer = Peer::new(addr);
    peer.trusted = true;
    harness.pex.put_peer(peer);

    harness.pool.add_connection(addr);
    harness.handles.events.connected(addr, false).await;
    wait_for("introduction sent", || !harness.pool.sent().is_empty()).await;

    let our_mirror = harness.handles.gateway.mirror().await.unwrap();
    harness
        .handles
        .events
        .message(addr, intro(our_mirror, 6677))
        .await;

    wait_for("self disconnect", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(a, r)| a == addr && *r == DisconnectReason::SelfConnect)
    })
    .await;
    assert!(harness.pex.removed().is_empty());
    assert!(harness.pex.get_peer(addr).is_some());

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// S3: duplicate mirror
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_mirror_disconnects_later_arrival() {
    let a = "10.0.0.2:7777";
    let b = "10.0.0.3:7777";
    let mirror = 0xB2B2_B2B2;
    let harness = start(test_config());

    for addr in [a, b] {
        harness.pool.add_connection(addr);
        harness.handles.events.connected(addr, false).await;
    }
    wait_for("both introductions sent", || harness.pool.sent().len() >= 2).await;

    harness.handles.events.message(a, intro(mirror, 6677)).await;
    wait_for("first peer introduced", || {
        harness.pool.disconnects().is_empty() && {
            // The introduction triggers a blocks request to that peer.
            harness
                .pool
                .sent()
                .iter()
                .any(|(addr, m)| addr == a && matches!(m, Message::GetBlocks(_)))
        }
    })
    .await;

    harness.handles.events.message(b, intro(mirror, 6677)).await;
    wait_for("duplicate disconnected", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(addr, r)| addr == b && *r == DisconnectReason::ConnectedTwice)
    })
    .await;

    // The earlier holder is untouched.
    assert_eq!(
        connection_state(&harness, a).await,
        Some(ConnectionState::Introduced)
    );
    assert_eq!(connection_state(&harness, b).await, None);

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// S4: IP diversity
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn fourth_connection_from_same_ip_is_rejected() {
    let harness = start(test_config());

    for port in [41001, 41002, 41003] {
        let addr = format!("203.0.113.0:{port}");
        harness.pool.add_connection(&addr);
        harness.handles.events.connected(addr, false).await;
    }
    wait_for("three admitted", || harness.pool.sent().len() >= 3).await;

    let fourth = "203.0.113.0:41000";
    harness.pool.add_connection(fourth);
    harness.handles.events.connected(fourth, false).await;

    wait_for("ip limit disconnect", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(a, r)| a == fourth && *r == DisconnectReason::IpLimitReached)
    })
    .await;
    assert_eq!(connection_state(&harness, fourth).await, None);

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// S5: introduction timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_peer_is_culled_and_forgotten() {
    let addr = "10.0.0.5:5000";
    let harness = start(test_config());
    harness.pex.put_peer(Peer::new(addr));

    harness.pool.add_connection(addr);
    harness.handles.events.connected(addr, false).await;
    wait_for("introduction sent", || !harness.pool.sent().is_empty()).await;

    // introduction_wait is 30s, the culling sweep runs every 3s; by t=33s
    // the silent peer must be gone.
    tokio::time::sleep(Duration::from_secs(34)).await;

    wait_for("introduction timeout disconnect", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(a, r)| a == addr && *r == DisconnectReason::IntroductionTimeout)
    })
    .await;
    wait_for("pex entry removed", || {
        harness.pex.removed().iter().any(|a| a == addr)
    })
    .await;
    assert_eq!(connection_state(&harness, addr).await, None);

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// Handshake gate
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn first_message_must_be_an_introduction() {
    let addr = "10.0.0.9:9999";
    let harness = start(test_config());

    harness.pool.add_connection(addr);
    harness.handles.events.connected(addr, false).await;
    wait_for("introduction sent", || !harness.pool.sent().is_empty()).await;

    harness.handles.events.message(addr, Message::Ping).await;

    wait_for("no-introduction disconnect", || {
        harness
            .pool
            .disconnects()
            .iter()
            .any(|(a, r)| a == addr && *r == DisconnectReason::NoIntroduction)
    })
    .await;

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// Outgoing solicitation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn trusted_peers_are_dialed_at_startup_regardless_of_caps() {
    let addr = "10.1.1.1:6677";
    let pex = Arc::new(NullPex::new());
    let mut peer = Peer::new(addr);
    peer.trusted = true;
    pex.put_peer(peer);

    let config = DaemonConfig {
        outgoing_max: 0,
        ..test_config()
    };
    let harness = start_with(
        config,
        Arc::new(NullPool::new()),
        pex,
        Arc::new(NullVisor::with_head(0)),
    );

    wait_for("trusted peer dialed", || {
        harness.pool.dial_attempts().iter().any(|a| a == addr)
    })
    .await;

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_dial_removes_row_and_bumps_retry() {
    let addr = "10.2.2.2:6677";
    let harness = start(test_config());
    harness.pex.put_peer(Peer::new(addr));
    harness.pool.fail_dial(addr);

    harness
        .handles
        .gateway
        .connect(addr.to_string())
        .await
        .unwrap()
        .unwrap();

    wait_for("retry bumped", || harness.pex.retry_times(addr) == 1).await;
    // The dial was attempted but never became a connection, and the retry
    // bump implies the pending row was already removed.
    assert_eq!(harness.pool.dial_attempts(), vec![addr.to_string()]);
    assert!(harness.pool.dialed().is_empty());
    assert_eq!(connection_state(&harness, addr).await, None);

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_pex_response_resets_all_retry_times() {
    let harness = start(test_config());

    // No peers in pex: the outgoing tick (5s) finds nothing and resets.
    tokio::time::sleep(Duration::from_secs(6)).await;
    wait_for("retry times reset", || harness.pex.reset_all_calls() >= 1).await;

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_dial_to_same_address_is_refused() {
    let addr = "10.3.3.3:6677";
    let harness = start(test_config());

    harness
        .handles
        .gateway
        .connect(addr.to_string())
        .await
        .unwrap()
        .unwrap();
    wait_for("dialed", || harness.pool.dialed().iter().any(|a| a == addr)).await;

    let second = harness.handles.gateway.connect(addr.to_string()).await.unwrap();
    assert!(matches!(second, Err(DaemonError::AlreadyConnected(_))));

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// Disabled outgoing connections
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn disabled_outgoing_makes_broadcasts_and_dials_noops() {
    let config = DaemonConfig {
        disable_outgoing_connections: true,
        ..test_config()
    };
    let harness = start(config);

    let result = harness
        .handles
        .gateway
        .connect("10.4.4.4:6677".to_string())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(DaemonError::OutgoingConnectionsDisabled)
    ));

    let txn = Transaction {
        inner_hash: sha256(b"t"),
        inputs: vec![],
        outputs: vec![],
    };
    let result = harness
        .handles
        .gateway
        .broadcast_transaction(txn)
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(DaemonError::OutgoingConnectionsDisabled)
    ));

    let resent = harness
        .handles
        .gateway
        .resend_unconfirmed_txns()
        .await
        .unwrap()
        .unwrap();
    assert!(resent.is_empty());

    assert!(harness.pool.dial_attempts().is_empty());
    assert!(harness.pool.broadcasts().is_empty());

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disable_networking_also_disables_pex() {
    let config = DaemonConfig {
        disable_networking: true,
        ..test_config()
    };
    let pex = Arc::new(NullPex::new());
    assert!(!pex.is_disabled());

    let harness = start_with(
        config,
        Arc::new(NullPool::new()),
        pex,
        Arc::new(NullVisor::with_head(0)),
    );

    // Constructing the daemon pushes the disable into the directory.
    assert!(harness.pex.is_disabled());

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// Periodic duties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn blocks_are_requested_and_announced_periodically() {
    let harness = start(test_config());

    tokio::time::sleep(Duration::from_secs(61)).await;

    wait_for("get blocks broadcast", || {
        harness
            .pool
            .broadcasts()
            .iter()
            .any(|m| matches!(m, Message::GetBlocks(g) if g.last_block == 0))
    })
    .await;
    wait_for("announce blocks broadcast", || {
        harness
            .pool
            .broadcasts()
            .iter()
            .any(|m| matches!(m, Message::AnnounceBlocks { max_bk_seq: 0 }))
    })
    .await;

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn announced_txns_are_flushed_to_the_visor() {
    let harness = start(test_config());
    let hash = sha256(b"announced");

    harness
        .handles
        .events
        .send_result(obol_daemon::SendResult {
            addr: "10.0.0.2:7777".to_string(),
            message: Message::AnnounceTxns { txns: vec![hash] },
            error: None,
        })
        .await;

    // flush_announced_txns runs every 3s.
    tokio::time::sleep(Duration::from_secs(4)).await;
    wait_for("flush delivered", || {
        harness
            .visor
            .announced()
            .iter()
            .any(|batch| batch.contains_key(&hash))
    })
    .await;

    harness.handles.shutdown.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn master_node_creates_and_publishes_blocks() {
    let pool = Arc::new(NullPool::new());
    let pex = Arc::new(NullPex::new());
    let visor = Arc::new(NullVisor::with_head(0));
    visor.set_master(true);
    let harness = start_with(test_config(), pool, pex, visor);

    // block_creation_interval is 10s.
    tokio::time::sleep(Duration::from_secs(11)).await;
    wait_for("block broadcast", || {
        harness
            .pool
            .broadcasts()
            .iter()
            .any(|m| matches!(m, Message::GiveBlocks { .. }))
    })
    .await;
    assert!(harness.visor.executed_seqs().contains(&1));

    harness.handles.shutdown.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_everything_in_order() {
    let harness = start(test_config());

    harness.handles.shutdown.shutdown().await;

    assert!(harness.pool.is_shut_down());
    assert!(harness.pex.is_shut_down());
    harness.task.await.unwrap().unwrap();

    // The gateway refuses work after shutdown.
    let result = harness.handles.gateway.connections().await;
    assert!(result.is_err());
}
