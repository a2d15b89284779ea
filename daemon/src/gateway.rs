//! RPC gateway into the run loop.
//!
//! Callers encode their work as closures bound to the daemon ("strand"
//! discipline) and post them on a bounded channel; the run loop executes
//! each inline, so gateway work sees the same serialized state as every
//! other branch. The reply travels back on a oneshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use obol_types::{Sha256, SignedBlock, Transaction};

use crate::connections::Connection;
use crate::daemon::Daemon;
use crate::error::{DaemonError, DisconnectReason};

/// A unit of work executed by the run loop on the daemon's state.
pub type GatewayRequest = Box<dyn FnOnce(&mut Daemon) + Send>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway is shut down")]
    Closed,
}

/// Cloneable handle for posting work into the run loop.
#[derive(Clone)]
pub struct Gateway {
    requests_tx: mpsc::Sender<GatewayRequest>,
    closed: Arc<AtomicBool>,
}

impl Gateway {
    pub(crate) fn new(requests_tx: mpsc::Sender<GatewayRequest>) -> Self {
        Self {
            requests_tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refuse further requests. Called by the shutdown coordinator after
    /// the run loop has stopped.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Post a closure to the run loop and await its result.
    async fn strand<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Daemon) -> T + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let req: GatewayRequest = Box::new(move |d| {
            let _ = reply_tx.send(f(d));
        });
        self.requests_tx
            .send(req)
            .await
            .map_err(|_| GatewayError::Closed)?;
        reply_rx.await.map_err(|_| GatewayError::Closed)
    }

    /// Snapshot of the connection table.
    pub async fn connections(&self) -> Result<Vec<Connection>, GatewayError> {
        self.strand(|d| d.connections().all()).await
    }

    /// The daemon's mirror value.
    pub async fn mirror(&self) -> Result<u32, GatewayError> {
        self.strand(|d| d.mirror()).await
    }

    /// Dial a peer now, outside the periodic solicitation.
    pub async fn connect(&self, addr: String) -> Result<Result<(), DaemonError>, GatewayError> {
        self.strand(move |d| d.connect_to_addr(&addr)).await
    }

    /// Disconnect a peer.
    pub async fn disconnect(
        &self,
        addr: String,
        reason: DisconnectReason,
    ) -> Result<Result<(), DaemonError>, GatewayError> {
        self.strand(move |d| d.disconnect(&addr, reason)).await
    }

    /// Broadcast a transaction to all peers.
    pub async fn broadcast_transaction(
        &self,
        txn: Transaction,
    ) -> Result<Result<(), DaemonError>, GatewayError> {
        self.strand(move |d| d.broadcast_transaction(txn)).await
    }

    /// Rebroadcast all unconfirmed transactions; returns the hashes that
    /// went out.
    pub async fn resend_unconfirmed_txns(
        &self,
    ) -> Result<Result<Vec<Sha256>, DaemonError>, GatewayError> {
        self.strand(|d| d.resend_unconfirmed_txns()).await
    }

    /// Create, execute, and broadcast a new block (master chain only).
    pub async fn create_and_publish_block(
        &self,
    ) -> Result<Result<SignedBlock, DaemonError>, GatewayError> {
        self.strand(|d| d.create_and_publish_block()).await
    }
}
