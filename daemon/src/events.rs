//! Event plumbing between the pool and the run loop.
//!
//! The pool's callbacks append to bounded channels the run loop consumes;
//! the send half encodes the backpressure policy. A full connect channel
//! blocks the pool, because a lost connect event leaks a socket. A full
//! disconnect channel drops the notification with a warning, because
//! disconnect is idempotent against the table and a later sweep catches it.

use tokio::sync::mpsc;

use obol_messages::Message;

use crate::error::{DaemonError, DisconnectReason};
use crate::pool::PoolError;

/// A client connected: either our dial completed (`solicited`) or an
/// inbound connection was accepted.
#[derive(Clone, Debug)]
pub struct ConnectEvent {
    pub addr: String,
    pub solicited: bool,
}

/// A connection terminated.
#[derive(Clone, Debug)]
pub struct DisconnectEvent {
    pub addr: String,
    pub reason: DisconnectReason,
}

/// A dial failed before producing a connection.
#[derive(Debug)]
pub struct ConnectionError {
    pub addr: String,
    pub error: PoolError,
}

/// A decoded inbound message with its originating address.
#[derive(Clone, Debug)]
pub struct MessageEvent {
    pub addr: String,
    pub message: Message,
}

/// Outcome of an asynchronous message send.
#[derive(Clone, Debug)]
pub struct SendResult {
    pub addr: String,
    pub message: Message,
    pub error: Option<String>,
}

/// The sending half handed to the pool implementation (and to the dial
/// worker). Cloneable; all methods are safe from any thread.
#[derive(Clone)]
pub struct EventSender {
    pub(crate) connect_tx: mpsc::Sender<ConnectEvent>,
    pub(crate) disconnect_tx: mpsc::Sender<DisconnectEvent>,
    pub(crate) error_tx: mpsc::Sender<ConnectionError>,
    pub(crate) message_tx: mpsc::Sender<MessageEvent>,
    pub(crate) send_result_tx: mpsc::Sender<SendResult>,
    pub(crate) setup_err_tx: mpsc::Sender<DaemonError>,
}

impl EventSender {
    /// Report a connection coming up. Blocks when the channel is full.
    pub async fn connected(&self, addr: impl Into<String>, solicited: bool) {
        let e = ConnectEvent {
            addr: addr.into(),
            solicited,
        };
        if self.connect_tx.send(e).await.is_err() {
            tracing::warn!("connect event dropped: daemon is gone");
        }
    }

    /// Blocking-context variant of [`connected`](Self::connected), for pool
    /// implementations that run on plain threads.
    pub fn connected_blocking(&self, addr: impl Into<String>, solicited: bool) {
        let e = ConnectEvent {
            addr: addr.into(),
            solicited,
        };
        if self.connect_tx.blocking_send(e).is_err() {
            tracing::warn!("connect event dropped: daemon is gone");
        }
    }

    /// Report a connection going down. Never blocks: on a full channel the
    /// notification is dropped with a warning.
    pub fn disconnected(&self, addr: impl Into<String>, reason: DisconnectReason) {
        let e = DisconnectEvent {
            addr: addr.into(),
            reason,
        };
        if let Err(err) = self.disconnect_tx.try_send(e) {
            tracing::warn!(error = %err, "disconnect event channel is full, dropping event");
        }
    }

    /// Report a failed dial. Blocks when the channel is full.
    pub async fn connection_error(&self, addr: impl Into<String>, error: PoolError) {
        let e = ConnectionError {
            addr: addr.into(),
            error,
        };
        if self.error_tx.send(e).await.is_err() {
            tracing::warn!("connection error dropped: daemon is gone");
        }
    }

    /// Blocking-context variant of [`connection_error`](Self::connection_error).
    pub fn connection_error_blocking(&self, addr: impl Into<String>, error: PoolError) {
        let e = ConnectionError {
            addr: addr.into(),
            error,
        };
        if self.error_tx.blocking_send(e).is_err() {
            tracing::warn!("connection error dropped: daemon is gone");
        }
    }

    /// Deliver a decoded inbound message. Blocks when the channel is full.
    pub async fn message(&self, addr: impl Into<String>, message: Message) {
        let e = MessageEvent {
            addr: addr.into(),
            message,
        };
        if self.message_tx.send(e).await.is_err() {
            tracing::warn!("message event dropped: daemon is gone");
        }
    }

    /// Blocking-context variant of [`message`](Self::message).
    pub fn message_blocking(&self, addr: impl Into<String>, message: Message) {
        let e = MessageEvent {
            addr: addr.into(),
            message,
        };
        if self.message_tx.blocking_send(e).is_err() {
            tracing::warn!("message event dropped: daemon is gone");
        }
    }

    /// Deliver a send outcome. Blocks when the channel is full.
    pub async fn send_result(&self, result: SendResult) {
        if self.send_result_tx.send(result).await.is_err() {
            tracing::warn!("send result dropped: daemon is gone");
        }
    }

    /// Blocking-context variant of [`send_result`](Self::send_result).
    pub fn send_result_blocking(&self, result: SendResult) {
        if self.send_result_tx.blocking_send(result).is_err() {
            tracing::warn!("send result dropped: daemon is gone");
        }
    }

    /// Report a fatal initialization failure; the run loop exits with it.
    pub fn report_setup_error(&self, err: DaemonError) {
        if let Err(e) = self.setup_err_tx.try_send(err) {
            tracing::error!(error = %e, "setup error channel is full or closed");
        }
    }
}

/// The receiving half, consumed once by the run loop.
pub struct EventReceivers {
    pub(crate) connect_rx: mpsc::Receiver<ConnectEvent>,
    pub(crate) disconnect_rx: mpsc::Receiver<DisconnectEvent>,
    pub(crate) error_rx: mpsc::Receiver<ConnectionError>,
    pub(crate) message_rx: mpsc::Receiver<MessageEvent>,
    pub(crate) send_result_rx: mpsc::Receiver<SendResult>,
    pub(crate) setup_err_rx: mpsc::Receiver<DaemonError>,
}

/// Allocate the event channels. Connect, disconnect, and error channels
/// hold `2 × max_connections`; message events use the pool's event channel
/// size.
pub fn event_channels(max_connections: usize, event_channel_size: usize) -> (EventSender, EventReceivers) {
    let conn_cap = (max_connections * 2).max(1);
    let (connect_tx, connect_rx) = mpsc::channel(conn_cap);
    let (disconnect_tx, disconnect_rx) = mpsc::channel(conn_cap);
    let (error_tx, error_rx) = mpsc::channel(conn_cap);
    let (message_tx, message_rx) = mpsc::channel(event_channel_size.max(1));
    let (send_result_tx, send_result_rx) = mpsc::channel(event_channel_size.max(1));
    let (setup_err_tx, setup_err_rx) = mpsc::channel(5);

    (
        EventSender {
            connect_tx,
            disconnect_tx,
            error_tx,
            message_tx,
            send_result_tx,
            setup_err_tx,
        },
        EventReceivers {
            connect_rx,
            disconnect_rx,
            error_rx,
            message_rx,
            send_result_rx,
            setup_err_rx,
        },
    )
}
