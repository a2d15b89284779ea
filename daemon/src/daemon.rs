//! The daemon: peer lifecycle and event dispatch.
//!
//! A single run loop selects over timers, pool events, gateway requests,
//! and the quit signal, and is the only writer of the connection table.
//! Concurrent producers (pool callbacks, the dial worker, gateway callers)
//! communicate exclusively through the bounded channels it drains. The one
//! exception is send-result handling, which runs on its own worker because
//! acks arrive at much higher rates than anything else and only touch the
//! announced-txn cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant as TokioInstant, Interval, MissedTickBehavior};

use obol_messages::{GetBlocks, Introduction, Message};
use obol_types::{PubKey, Sha256, SignedBlock, Transaction};
use obol_utils::iputil::{is_localhost, split_addr};
use obol_utils::Elapser;

use crate::announced_txns::AnnouncedTxns;
use crate::config::DaemonConfig;
use crate::connections::{
    Connection, ConnectionState, Connections, IntroducedError, IntroductionContext,
};
use crate::daemoner::Daemoner;
use crate::dispatcher;
use crate::error::{DaemonError, DisconnectReason};
use crate::events::{
    event_channels, ConnectEvent, ConnectionError, DisconnectEvent, EventReceivers, EventSender,
    MessageEvent, SendResult,
};
use crate::gateway::{Gateway, GatewayRequest};
use crate::metrics::DaemonMetrics;
use crate::pex::{Peer, Pex, PexError};
use crate::pool::{Pool, PoolError};
use crate::shutdown::ShutdownCoordinator;
use crate::visor::{TxnInjectResult, Visor, VisorError};

/// Run-loop branches slower than this get a warning.
const RUN_DURATION_THRESHOLD: Duration = Duration::from_millis(200);

/// Capacity of the gateway request channel.
const GATEWAY_REQUESTS_CAPACITY: usize = 32;

/// Handles returned from [`Daemon::new`]: the event sender for the pool,
/// the gateway for RPC callers, and the shutdown coordinator.
pub struct DaemonHandles {
    pub events: EventSender,
    pub gateway: Gateway,
    pub shutdown: ShutdownCoordinator,
}

/// Flips the done flag when the run loop returns, however it returns.
struct DoneGuard(watch::Sender<bool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

/// The daemon core.
pub struct Daemon {
    config: DaemonConfig,
    pool: Arc<dyn Pool>,
    pex: Arc<dyn Pex>,
    visor: Arc<dyn Visor>,

    pub(crate) connections: Connections,
    announced_txns: Arc<AnnouncedTxns>,
    metrics: Arc<DaemonMetrics>,

    /// Our process identifier, chosen once at startup.
    mirror: u32,

    event_sender: EventSender,
    events: Option<EventReceivers>,
    gateway_rx: Option<mpsc::Receiver<GatewayRequest>>,
    /// Kept so the request channel stays open for the lifetime of the
    /// run loop even if the host drops its handles.
    gateway: Gateway,
    quit: broadcast::Sender<()>,
    done_tx: watch::Sender<bool>,
}

impl Daemon {
    /// Build a daemon around the given collaborators.
    ///
    /// Returns the daemon plus the handles the host wires up: the
    /// [`EventSender`] goes to the pool implementation, the [`Gateway`] to
    /// RPC callers, and the [`ShutdownCoordinator`] to whoever owns the
    /// process lifecycle.
    pub fn new(
        mut config: DaemonConfig,
        pool: Arc<dyn Pool>,
        pex: Arc<dyn Pex>,
        visor: Arc<dyn Visor>,
    ) -> Result<(Self, DaemonHandles), DaemonError> {
        config.preprocess()?;

        // Disabling networking disables the peer directory too; no branch
        // of the run loop may solicit or share peers in that mode.
        if config.disable_networking {
            pex.set_disabled(true);
        }

        let mirror = loop {
            let m: u32 = rand::random();
            if m != 0 {
                break m;
            }
        };

        let (event_sender, events) =
            event_channels(config.max_connections, config.event_channel_size);
        let (gateway_tx, gateway_rx) = mpsc::channel(GATEWAY_REQUESTS_CAPACITY);
        let gateway = Gateway::new(gateway_tx);
        let (quit, _) = broadcast::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        let shutdown = ShutdownCoordinator::new(
            quit.clone(),
            done_rx,
            Arc::clone(&pool),
            gateway.clone(),
            Arc::clone(&pex),
        );

        tracing::info!(mirror, "daemon initialized");

        let daemon = Self {
            config,
            pool,
            pex,
            visor,
            connections: Connections::new(),
            announced_txns: Arc::new(AnnouncedTxns::new()),
            metrics: Arc::new(DaemonMetrics::new()),
            mirror,
            event_sender: event_sender.clone(),
            events: Some(events),
            gateway_rx: Some(gateway_rx),
            gateway: gateway.clone(),
            quit,
            done_tx,
        };

        Ok((
            daemon,
            DaemonHandles {
                events: event_sender,
                gateway,
                shutdown,
            },
        ))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Our non-zero process identifier.
    pub fn mirror(&self) -> u32 {
        self.mirror
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn metrics(&self) -> Arc<DaemonMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn announced_txns(&self) -> Arc<AnnouncedTxns> {
        Arc::clone(&self.announced_txns)
    }

    /// A fresh gateway handle into this daemon's run loop.
    pub fn gateway(&self) -> Gateway {
        self.gateway.clone()
    }

    /// Main loop for peer and connection management. Returns when the quit
    /// signal fires or a fatal error surfaces.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let _done = DoneGuard(self.done_tx.clone());
        let events = self.events.take().ok_or(DaemonError::AlreadyRunning)?;
        let mut gateway_rx = self.gateway_rx.take().ok_or(DaemonError::AlreadyRunning)?;
        let mut quit_rx = self.quit.subscribe();

        let EventReceivers {
            mut connect_rx,
            mut disconnect_rx,
            mut error_rx,
            mut message_rx,
            send_result_rx,
            mut setup_err_rx,
        } = events;

        // Send results drain on a dedicated worker so a burst of broadcast
        // acks cannot starve this loop.
        let send_results_task = tokio::spawn(send_result_loop(
            send_result_rx,
            self.quit.subscribe(),
            Arc::clone(&self.announced_txns),
            self.config.disable_networking,
        ));

        if !self.config.disable_outgoing_connections {
            self.connect_to_trusted_peers();
        }

        let mut cull_invalid = ticker(self.config.cull_invalid_rate_secs);
        let mut request_peers = ticker(self.config.request_peers_rate_secs);
        let mut clear_stale = ticker(self.config.clear_stale_rate_secs);
        let mut idle_check = ticker(self.config.idle_check_rate_secs);
        let mut outgoing = ticker(self.config.outgoing_rate_secs);
        let mut private = ticker(self.config.private_rate_secs);
        let mut flush_announced = ticker(self.config.flush_announced_txns_rate_secs);
        let mut block_creation = ticker(self.config.block_creation_interval_secs);
        let mut unconfirmed_refresh = ticker(self.config.unconfirmed_refresh_rate_secs);
        let mut unconfirmed_remove = ticker(self.config.unconfirmed_remove_invalid_rate_secs);
        let mut blocks_request = ticker(self.config.blocks_request_rate_secs);
        let mut blocks_announce = ticker(self.config.blocks_announce_rate_secs);

        let mut elapser = Elapser::new(RUN_DURATION_THRESHOLD);
        let mut result = Ok(());

        loop {
            elapser.check();
            tokio::select! {
                _ = quit_rx.recv() => break,

                _ = cull_invalid.tick() => {
                    elapser.register("cull_invalid");
                    if !self.config.disable_networking {
                        self.cull_invalid_connections(TokioInstant::now());
                    }
                }

                _ = request_peers.tick() => {
                    elapser.register("request_peers");
                    self.request_peers();
                }

                _ = clear_stale.tick() => {
                    elapser.register("clear_stale_connections");
                    if !self.config.disable_networking {
                        if let Err(e) = self.pool.clear_stale_connections() {
                            tracing::warn!(error = %e, "clear_stale_connections failed");
                        }
                    }
                }

                _ = idle_check.tick() => {
                    elapser.register("idle_check");
                    if !self.config.disable_networking {
                        if let Err(e) = self.pool.send_pings() {
                            tracing::warn!(error = %e, "send_pings failed");
                        }
                    }
                }

                _ = outgoing.tick() => {
                    elapser.register("outgoing_connections");
                    let trusted_num = self.pex.trusted().len();
                    if !self.config.disable_outgoing_connections
                        && self.connections.outgoing_len() < self.config.outgoing_max + trusted_num
                        && self.connections.pending_len() < self.config.pending_max
                    {
                        self.connect_to_random_peer();
                    }
                }

                _ = private.tick() => {
                    elapser.register("private_connections");
                    if !self.config.disable_outgoing_connections {
                        self.make_private_connections();
                    }
                }

                maybe = connect_rx.recv() => {
                    elapser.register("connect_event");
                    if let Some(e) = maybe {
                        if self.config.disable_networking {
                            tracing::error!("there should be no connect events");
                        } else {
                            self.on_connect(&e);
                        }
                    }
                }

                maybe = disconnect_rx.recv() => {
                    elapser.register("disconnect_event");
                    if let Some(e) = maybe {
                        if self.config.disable_networking {
                            tracing::error!("there should be no disconnect events");
                        } else {
                            self.on_disconnect(&e);
                        }
                    }
                }

                maybe = error_rx.recv() => {
                    elapser.register("connection_error");
                    if let Some(e) = maybe {
                        if self.config.disable_networking {
                            tracing::error!("there should be no connection errors");
                        } else {
                            self.handle_connection_error(&e);
                        }
                    }
                }

                _ = flush_announced.tick() => {
                    elapser.register("flush_announced_txns");
                    let txns = self.announced_txns.flush();
                    if !txns.is_empty() {
                        if let Err(e) = self.visor.set_transactions_announced(&txns) {
                            tracing::error!(error = %e, "failed to set txn announce times");
                            result = Err(e.into());
                            break;
                        }
                    }
                }

                maybe = message_rx.recv() => {
                    elapser.register("message_event");
                    if let Some(ev) = maybe {
                        if self.config.disable_networking {
                            tracing::error!("there should be no message events");
                        } else {
                            self.process_message_event(ev);
                        }
                    }
                }

                maybe = gateway_rx.recv() => {
                    elapser.register("gateway_request");
                    if let Some(req) = maybe {
                        req(self);
                    }
                }

                _ = block_creation.tick() => {
                    elapser.register("block_creation");
                    if self.visor.is_master() {
                        match self.create_and_publish_block() {
                            Ok(sb) => {
                                tracing::info!(
                                    seq = sb.seq(),
                                    block = %sb.hash(),
                                    "created and published a new block"
                                );
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "failed to create and publish block");
                            }
                        }
                    }
                }

                _ = unconfirmed_refresh.tick() => {
                    elapser.register("unconfirmed_refresh");
                    match self.visor.refresh_unconfirmed() {
                        Ok(hashes) => {
                            if let Err(e) = self.announce_txns(&hashes) {
                                tracing::warn!(error = %e, "announce refreshed txns failed");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "refresh_unconfirmed failed"),
                    }
                }

                _ = unconfirmed_remove.tick() => {
                    elapser.register("unconfirmed_remove_invalid");
                    match self.visor.remove_invalid_unconfirmed() {
                        Ok(removed) if !removed.is_empty() => {
                            tracing::info!(
                                count = removed.len(),
                                "removed txns that began violating hard constraints"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "remove_invalid_unconfirmed failed"),
                    }
                }

                _ = blocks_request.tick() => {
                    elapser.register("blocks_request");
                    if let Err(e) = self.request_blocks() {
                        tracing::warn!(error = %e, "request blocks failed");
                    }
                }

                _ = blocks_announce.tick() => {
                    elapser.register("blocks_announce");
                    if let Err(e) = self.announce_blocks() {
                        tracing::warn!(error = %e, "announce blocks failed");
                    }
                }

                maybe = setup_err_rx.recv() => {
                    if let Some(e) = maybe {
                        tracing::error!(error = %e, "setup error");
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        // Wake the send-result worker in case we broke out on an error
        // rather than on quit.
        let _ = self.quit.send(());
        let _ = send_results_task.await;

        tracing::info!("daemon run loop closed");
        result
    }

    // ── Admission ───────────────────────────────────────────────────────

    fn on_connect(&mut self, e: &ConnectEvent) {
        let direction = if e.solicited { "outgoing" } else { "incoming" };
        tracing::info!(addr = %e.addr, direction, "connected to peer");

        match self.pool.is_conn_exist(&e.addr) {
            Err(err) => {
                tracing::error!(error = %err, "is_conn_exist failed");
                return;
            }
            Ok(false) => {
                tracing::warn!(addr = %e.addr, "connect event for a connection the pool no longer has");
                return;
            }
            Ok(true) => {}
        }

        if self.ip_count_maxed(&e.addr) {
            tracing::info!(addr = %e.addr, "max connections for this IP reached, disconnecting");
            self.metrics.connections_rejected.inc();
            self.disconnect_logged(&e.addr, DisconnectReason::IpLimitReached);
            return;
        }

        if e.solicited {
            let n = match self.pool.outgoing_connections_num() {
                Ok(n) => n,
                Err(err) => {
                    tracing::error!(error = %err, "outgoing_connections_num failed");
                    return;
                }
            };
            if n > self.config.outgoing_max {
                tracing::warn!(addr = %e.addr, outgoing = n, "max outgoing connections reached, disconnecting");
                self.metrics.connections_rejected.inc();
                self.disconnect_logged(&e.addr, DisconnectReason::MaxOutgoingConnectionsReached);
                return;
            }
        }

        let outgoing = match self.connections.connected(&e.addr, TokioInstant::now()) {
            Ok(c) => c.outgoing,
            Err(err) => {
                tracing::error!(addr = %e.addr, error = %err, "connection table connected failed");
                self.disconnect_logged(&e.addr, DisconnectReason::IncomprehensibleError);
                return;
            }
        };

        // The row is already marked outgoing by the earlier pending call;
        // a mismatch means the state machine itself is broken.
        if outgoing != e.solicited {
            tracing::error!(
                addr = %e.addr,
                outgoing,
                solicited = e.solicited,
                "connection direction does not match the connect event"
            );
        }

        self.update_connection_gauges();

        tracing::debug!(addr = %e.addr, mirror = self.mirror, "sending introduction");
        let m = Message::Introduction(Introduction {
            mirror: self.mirror,
            listen_port: self.config.port,
            protocol_version: self.config.protocol_version,
            extra: self.config.blockchain_pubkey.as_bytes().to_vec(),
        });
        if let Err(err) = self.pool.send_message(&e.addr, m) {
            tracing::error!(addr = %e.addr, error = %err, "introduction send failed");
            self.disconnect_logged(&e.addr, DisconnectReason::VersionSendFailed);
        }
    }

    fn on_disconnect(&mut self, e: &DisconnectEvent) {
        tracing::info!(addr = %e.addr, reason = %e.reason, "peer disconnected");

        if let Err(err) = self.connections.remove(&e.addr) {
            tracing::error!(addr = %e.addr, error = %err, "connection table remove failed");
        }
        self.update_connection_gauges();

        // A peer that never introduced itself is not a usable peer; forget
        // it unless the operator pinned it.
        if e.reason == DisconnectReason::IntroductionTimeout && !self.is_trusted_peer(&e.addr) {
            self.pex.remove_peer(&e.addr);
        }
    }

    fn handle_connection_error(&mut self, c: &ConnectionError) {
        tracing::debug!(addr = %c.addr, error = %c.error, "connection failed");
        if let Err(err) = self.connections.remove(&c.addr) {
            tracing::error!(addr = %c.addr, error = %err, "connection table remove failed");
        }
        self.update_connection_gauges();
        self.pex.increase_retry_times(&c.addr);
    }

    /// Disconnect `Connected` rows that have outlived the introduction
    /// window.
    pub(crate) fn cull_invalid_connections(&mut self, now: TokioInstant) {
        let wait = self.config.introduction_wait();
        for c in self.connections.all() {
            if c.state != ConnectionState::Connected {
                continue;
            }
            let Some(connected_at) = c.connected_at else {
                continue;
            };
            if now.saturating_duration_since(connected_at) > wait {
                tracing::info!(addr = %c.addr, "disconnecting peer for not sending an introduction");
                self.disconnect_logged(&c.addr, DisconnectReason::IntroductionTimeout);
            }
        }
    }

    fn request_peers(&self) {
        if self.pex.is_disabled() || self.pex.is_full() {
            return;
        }
        if let Err(e) = self.pool.broadcast_message(Message::GetPeers) {
            tracing::warn!(error = %e, "broadcast GetPeers failed");
        }
    }

    /// Whether the per-IP cap is already met for this address. Always
    /// false in localhost-only mode; true for unparseable addresses.
    fn ip_count_maxed(&self, addr: &str) -> bool {
        let Some((ip, _)) = split_addr(addr) else {
            tracing::error!(addr, "ip_count_maxed called with an invalid addr");
            return true;
        };
        !self.config.localhost_only && self.connections.ip_count(&ip) >= self.config.ip_counts_max
    }

    fn is_trusted_peer(&self, addr: &str) -> bool {
        self.pex.get_peer(addr).is_some_and(|p| p.trusted)
    }

    fn disconnect_logged(&self, addr: &str, reason: DisconnectReason) {
        if let Err(e) = self.pool.disconnect(addr, reason) {
            tracing::error!(addr, %reason, error = %e, "disconnect failed");
        }
    }

    fn update_connection_gauges(&self) {
        self.metrics.connections.set(self.connections.len() as i64);
        self.metrics
            .outgoing_connections
            .set(self.connections.outgoing_len() as i64);
        self.metrics
            .pending_connections
            .set(self.connections.pending_len() as i64);
    }

    // ── Outgoing solicitation ───────────────────────────────────────────

    /// Dial a peer. Returns an error if no attempt was made; a failing
    /// attempt reports back through the connection-error channel instead.
    pub(crate) fn connect_to_peer(&mut self, p: &Peer) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Err(DaemonError::OutgoingConnectionsDisabled);
        }

        let Some((ip, _)) = split_addr(&p.addr) else {
            tracing::warn!(addr = %p.addr, "pex gave us an invalid peer");
            return Err(DaemonError::InvalidAddress(p.addr.clone()));
        };
        if self.config.localhost_only && !is_localhost(&ip) {
            return Err(DaemonError::NotLocalhost);
        }
        if self.connections.get(&p.addr).is_some() {
            return Err(DaemonError::AlreadyConnected(p.addr.clone()));
        }
        if !self.config.localhost_only && self.connections.ip_count(&ip) != 0 {
            return Err(DaemonError::IpAlreadyUsed(ip));
        }

        tracing::debug!(addr = %p.addr, "establishing outgoing connection");

        if let Err(e) = self.connections.pending(&p.addr) {
            tracing::error!(addr = %p.addr, error = %e, "connection table pending failed");
            return Err(e.into());
        }
        self.update_connection_gauges();

        // The dial itself blocks, so it runs on a short-lived worker;
        // failures come back as connection errors.
        let pool = Arc::clone(&self.pool);
        let sender = self.event_sender.clone();
        let addr = p.addr.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = pool.connect(&addr) {
                sender.connection_error_blocking(addr, e);
            }
        });

        Ok(())
    }

    /// Dial an arbitrary address now (gateway path).
    pub(crate) fn connect_to_addr(&mut self, addr: &str) -> Result<(), DaemonError> {
        self.connect_to_peer(&Peer::new(addr))
    }

    /// Disconnect a peer through the pool (gateway path).
    pub(crate) fn disconnect(
        &self,
        addr: &str,
        reason: DisconnectReason,
    ) -> Result<(), DaemonError> {
        self.pool.disconnect(addr, reason)?;
        Ok(())
    }

    /// Dial every trusted public peer once, independently of the caps.
    fn connect_to_trusted_peers(&mut self) {
        if self.config.disable_outgoing_connections {
            return;
        }
        tracing::info!("connect to trusted peers");
        for p in self.pex.trusted_public() {
            if let Err(e) = self.connect_to_peer(&p) {
                tracing::warn!(addr = %p.addr, error = %e, "connect to trusted peer failed");
            }
        }
    }

    /// Keep a permanent connection to every private peer.
    fn make_private_connections(&mut self) {
        if self.config.disable_outgoing_connections {
            return;
        }
        for p in self.pex.private_peers() {
            tracing::info!(addr = %p.addr, "private peer attempt");
            if let Err(e) = self.connect_to_peer(&p) {
                tracing::debug!(addr = %p.addr, error = %e, "did not connect to private peer");
            }
        }
    }

    /// Dial random public, untrusted peers. When pex yields nothing, all
    /// retry counters are reset as a coarse recovery from a saturated
    /// back-off table.
    fn connect_to_random_peer(&mut self) {
        if self.config.disable_outgoing_connections {
            return;
        }
        let peers = self.pex.random_public_untrusted(self.config.outgoing_max);
        for p in &peers {
            if let Err(e) = self.connect_to_peer(p) {
                tracing::warn!(addr = %p.addr, error = %e, "connect to random peer failed");
            }
        }
        if peers.is_empty() {
            self.pex.reset_all_retry_times();
        }
    }

    // ── Message handling ────────────────────────────────────────────────

    /// Whether the connection still owes us an introduction.
    fn needs_intro(&self, addr: &str) -> bool {
        match self.connections.get(addr) {
            None => {
                tracing::warn!(addr, "needs_intro did not find a matching connection");
                false
            }
            Some(c) => !c.has_introduced(),
        }
    }

    /// Handshake gate, then dispatch.
    pub(crate) fn process_message_event(&mut self, ev: MessageEvent) {
        // The first message must be an introduction. Checked at process
        // time, not receive time, because the introduction itself only
        // updates the table when processed.
        if self.needs_intro(&ev.addr) && !matches!(ev.message, Message::Introduction(_)) {
            tracing::info!(
                addr = %ev.addr,
                message = ev.message.name(),
                "expected an introduction, disconnecting"
            );
            self.disconnect_logged(&ev.addr, DisconnectReason::NoIntroduction);
        }
        dispatcher::process_message(self, &ev.addr, ev.message);
        self.metrics.messages_received.inc();
    }

    // ── Broadcast API ───────────────────────────────────────────────────

    /// Ask every peer for blocks after our head.
    pub fn request_blocks(&self) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Ok(());
        }
        let head = self.visor.head_bk_seq()?.ok_or(DaemonError::NoHeadBlock)?;
        let m = Message::GetBlocks(GetBlocks {
            last_block: head,
            request_blocks: self.config.blocks_response_count,
        });
        if let Err(e) = self.pool.broadcast_message(m) {
            tracing::debug!(error = %e, "broadcast GetBlocks failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Tell every peer where our head is.
    pub fn announce_blocks(&self) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Ok(());
        }
        let head = self.visor.head_bk_seq()?.ok_or(DaemonError::NoHeadBlock)?;
        let m = Message::AnnounceBlocks { max_bk_seq: head };
        if let Err(e) = self.pool.broadcast_message(m) {
            tracing::debug!(error = %e, "broadcast AnnounceBlocks failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Announce all valid unconfirmed transactions, in batches.
    pub fn announce_all_txns(&self) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Ok(());
        }
        let hashes = self.visor.get_all_valid_unconfirmed_tx_hashes()?;
        for chunk in divide_hashes(&hashes, self.config.max_txn_announce_num) {
            if let Err(e) = self.pool.broadcast_message(Message::AnnounceTxns { txns: chunk }) {
                tracing::debug!(error = %e, "broadcast AnnounceTxns failed");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Announce the given transaction hashes.
    pub fn announce_txns(&self, hashes: &[Sha256]) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections || hashes.is_empty() {
            return Ok(());
        }
        let m = Message::AnnounceTxns {
            txns: hashes.to_vec(),
        };
        if let Err(e) = self.pool.broadcast_message(m) {
            tracing::debug!(error = %e, "broadcast AnnounceTxns failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Ask one peer for blocks after our head.
    pub fn request_blocks_from_addr(&self, addr: &str) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Err(DaemonError::OutgoingConnectionsDisabled);
        }
        let head = self.visor.head_bk_seq()?.ok_or(DaemonError::NoHeadBlock)?;
        let m = Message::GetBlocks(GetBlocks {
            last_block: head,
            request_blocks: self.config.blocks_response_count,
        });
        self.pool.send_message(addr, m)?;
        Ok(())
    }

    /// Rebroadcast every unconfirmed transaction; returns the hashes that
    /// went out. Broadcast failures are skipped, not returned.
    pub fn resend_unconfirmed_txns(&self) -> Result<Vec<Sha256>, DaemonError> {
        if self.config.disable_outgoing_connections {
            return Ok(Vec::new());
        }
        let txns = self.visor.get_all_unconfirmed_transactions()?;
        let mut sent = Vec::new();
        for txn in txns {
            let hash = txn.hash();
            tracing::debug!(txn = %hash, "rebroadcast txn");
            if self.broadcast_transaction(txn).is_ok() {
                sent.push(hash);
            }
        }
        Ok(sent)
    }

    /// Broadcast a single transaction to all peers.
    pub fn broadcast_transaction(&self, txn: Transaction) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Err(DaemonError::OutgoingConnectionsDisabled);
        }
        let size = self.pool.size()?;
        tracing::debug!(connections = size, "broadcasting transaction");
        let m = Message::GiveTxns { txns: vec![txn] };
        if let Err(e) = self.pool.broadcast_message(m) {
            tracing::error!(error = %e, "broadcast transaction failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Create a block from unconfirmed transactions, execute it, and
    /// broadcast it. The block stays committed even when the broadcast
    /// fails; the failure is surfaced to the caller.
    pub fn create_and_publish_block(&self) -> Result<SignedBlock, DaemonError> {
        if self.config.disable_outgoing_connections {
            return Err(DaemonError::OutgoingConnectionsDisabled);
        }
        let sb = self.visor.create_and_execute_block()?;
        if let Err(e) = self.broadcast_block(&sb) {
            tracing::error!(seq = sb.seq(), error = %e, "block committed but broadcast failed");
            return Err(e);
        }
        Ok(sb)
    }

    fn broadcast_block(&self, sb: &SignedBlock) -> Result<(), DaemonError> {
        if self.config.disable_outgoing_connections {
            return Ok(());
        }
        let m = Message::GiveBlocks {
            blocks: vec![sb.clone()],
        };
        self.pool.broadcast_message(m)?;
        Ok(())
    }
}

// ── Daemoner capability ─────────────────────────────────────────────────

impl Daemoner for Daemon {
    fn send_message(&self, addr: &str, msg: Message) -> Result<(), PoolError> {
        self.pool.send_message(addr, msg)
    }

    fn broadcast_message(&self, msg: Message) -> Result<(), PoolError> {
        self.pool.broadcast_message(msg)
    }

    fn disconnect_pool(&self, addr: &str, reason: DisconnectReason) -> Result<(), PoolError> {
        self.pool.disconnect(addr, reason)
    }

    fn is_default_connection(&self, addr: &str) -> bool {
        self.pool.is_default_connection(addr)
    }

    fn is_max_default_connections_reached(&self) -> Result<bool, PoolError> {
        self.pool.is_max_default_connections_reached()
    }

    fn pex_disabled(&self) -> bool {
        self.pex.is_disabled()
    }

    fn random_exchangeable(&self, n: usize) -> Vec<Peer> {
        self.pex.random_exchangeable(n)
    }

    fn add_peers(&self, addrs: &[String]) -> usize {
        self.pex.add_peers(addrs)
    }

    fn set_has_incoming_port(&self, addr: &str) -> Result<(), PexError> {
        self.pex.set_has_incoming_port(addr, true)
    }

    fn increase_retry_times(&self, addr: &str) {
        self.pex.increase_retry_times(addr);
    }

    fn reset_retry_times(&self, addr: &str) {
        self.pex.reset_retry_times(addr);
    }

    fn is_trusted_peer(&self, addr: &str) -> bool {
        Daemon::is_trusted_peer(self, addr)
    }

    fn remove_peer(&self, addr: &str) {
        self.pex.remove_peer(addr);
    }

    fn record_peer_height(&mut self, addr: &str, height: u64) {
        if let Err(e) = self.connections.set_height(addr, height) {
            tracing::error!(addr, height, error = %e, "set peer height failed");
        }
    }

    fn connection_introduced(
        &mut self,
        addr: &str,
        intro: &Introduction,
    ) -> Result<Connection, IntroducedError> {
        let ctx = IntroductionContext {
            our_mirror: self.mirror,
            our_pubkey: self.config.blockchain_pubkey,
            min_protocol_version: self.config.min_protocol_version,
        };
        let conn = self.connections.introduced(addr, &ctx, intro)?.clone();
        Ok(conn)
    }

    fn mirror(&self) -> u32 {
        self.mirror
    }

    fn daemon_config(&self) -> &DaemonConfig {
        &self.config
    }

    fn blockchain_pubkey(&self) -> PubKey {
        self.config.blockchain_pubkey
    }

    fn request_blocks_from_addr(&self, addr: &str) -> Result<(), DaemonError> {
        Daemon::request_blocks_from_addr(self, addr)
    }

    fn announce_all_txns(&self) -> Result<(), DaemonError> {
        Daemon::announce_all_txns(self)
    }

    fn head_bk_seq(&self) -> Result<Option<u64>, VisorError> {
        self.visor.head_bk_seq()
    }

    fn get_signed_blocks_since(
        &self,
        seq: u64,
        count: u64,
    ) -> Result<Vec<SignedBlock>, VisorError> {
        self.visor.get_signed_blocks_since(seq, count)
    }

    fn execute_signed_block(&self, b: SignedBlock) -> Result<(), VisorError> {
        self.visor.execute_signed_block(b)
    }

    fn get_unconfirmed_unknown(&self, hashes: &[Sha256]) -> Result<Vec<Sha256>, VisorError> {
        self.visor.get_unconfirmed_unknown(hashes)
    }

    fn get_unconfirmed_known(&self, hashes: &[Sha256]) -> Result<Vec<Transaction>, VisorError> {
        self.visor.get_unconfirmed_known(hashes)
    }

    fn inject_transaction(&self, txn: Transaction) -> Result<TxnInjectResult, VisorError> {
        self.visor.inject_transaction(txn)
    }

    fn set_transactions_announced(&self, txns: &HashMap<Sha256, u64>) -> Result<(), VisorError> {
        self.visor.set_transactions_announced(txns)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// A periodic timer whose first tick fires one full period from now.
fn ticker(period_secs: u64) -> Interval {
    let period = Duration::from_secs(period_secs.max(1));
    let mut t = interval_at(TokioInstant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

/// Partition hashes into chunks of `n`, preserving order. Every chunk
/// except possibly the last has exactly `n` entries.
pub fn divide_hashes(hashes: &[Sha256], n: usize) -> Vec<Vec<Sha256>> {
    if hashes.is_empty() || n == 0 {
        return Vec::new();
    }
    hashes.chunks(n).map(<[Sha256]>::to_vec).collect()
}

/// Drains send results off-loop. Only touches thread-safe state: the
/// logger and the announced-txn cache.
async fn send_result_loop(
    mut rx: mpsc::Receiver<SendResult>,
    mut quit: broadcast::Receiver<()>,
    cache: Arc<AnnouncedTxns>,
    networking_disabled: bool,
) {
    let mut elapser = Elapser::new(RUN_DURATION_THRESHOLD);
    loop {
        elapser.check();
        tokio::select! {
            _ = quit.recv() => break,
            maybe = rx.recv() => {
                let Some(r) = maybe else { break };
                elapser.register("send_results");
                if networking_disabled {
                    tracing::error!("there should be nothing in send results");
                    return;
                }
                handle_message_send_result(&r, &cache);
            }
        }
    }
}

fn handle_message_send_result(r: &SendResult, cache: &AnnouncedTxns) {
    if let Some(err) = &r.error {
        tracing::warn!(
            addr = %r.addr,
            message = r.message.name(),
            error = %err,
            "failed to send message"
        );
        return;
    }
    if let Some(hashes) = r.message.announced_txn_hashes() {
        cache.add(&hashes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_types::sha256;
    use proptest::prelude::*;

    fn hashes(n: usize) -> Vec<Sha256> {
        (0..n).map(|i| sha256(&[i as u8])).collect()
    }

    #[test]
    fn divide_hashes_partitions_with_short_tail() {
        let hs = hashes(5);
        let parts = divide_hashes(&hs, 2);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], &hs[0..2]);
        assert_eq!(parts[1], &hs[2..4]);
        assert_eq!(parts[2], &hs[4..5]);
    }

    #[test]
    fn divide_hashes_empty_input() {
        assert!(divide_hashes(&[], 2).is_empty());
    }

    #[test]
    fn divide_hashes_single_short_chunk() {
        let hs = hashes(1);
        let parts = divide_hashes(&hs, 2);
        assert_eq!(parts, vec![hs]);
    }

    #[test]
    fn divide_hashes_exact_multiple() {
        let hs = hashes(4);
        let parts = divide_hashes(&hs, 2);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 2));
    }

    proptest! {
        /// Concatenating the chunks reproduces the input; all chunks but
        /// the last are exactly `n` long, and the last is in 1..=n.
        #[test]
        fn divide_hashes_is_a_partition(len in 0usize..200, n in 1usize..20) {
            let hs = hashes(len);
            let parts = divide_hashes(&hs, n);

            let flattened: Vec<Sha256> = parts.iter().flatten().copied().collect();
            prop_assert_eq!(&flattened, &hs);

            if let Some((last, body)) = parts.split_last() {
                prop_assert!(body.iter().all(|p| p.len() == n));
                prop_assert!(!last.is_empty() && last.len() <= n);
            } else {
                prop_assert!(hs.is_empty());
            }
        }
    }

    #[test]
    fn send_result_failure_does_not_touch_cache() {
        let cache = AnnouncedTxns::new();
        let r = SendResult {
            addr: "1.1.1.1:1".to_string(),
            message: Message::AnnounceTxns {
                txns: hashes(2),
            },
            error: Some("write: broken pipe".to_string()),
        };
        handle_message_send_result(&r, &cache);
        assert!(cache.flush().is_empty());
    }

    #[test]
    fn send_result_success_records_announced_hashes() {
        let cache = AnnouncedTxns::new();
        let hs = hashes(3);
        let r = SendResult {
            addr: "1.1.1.1:1".to_string(),
            message: Message::AnnounceTxns { txns: hs.clone() },
            error: None,
        };
        handle_message_send_result(&r, &cache);
        let flushed = cache.flush();
        assert_eq!(flushed.len(), 3);
        for h in hs {
            assert!(flushed.contains_key(&h));
        }
    }

    #[test]
    fn send_result_ignores_non_txn_messages() {
        let cache = AnnouncedTxns::new();
        let r = SendResult {
            addr: "1.1.1.1:1".to_string(),
            message: Message::Ping,
            error: None,
        };
        handle_message_send_result(&r, &cache);
        assert!(cache.flush().is_empty());
    }
}
