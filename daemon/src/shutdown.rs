//! Orderly shutdown of the daemon and its collaborators.
//!
//! Closing the quit signal stops the run loop; the coordinator then stops
//! the pool, the gateway, and pex, in that fixed order, and finally awaits
//! the run loop's done flag. After quit is signalled no new dials are
//! initiated.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::gateway::Gateway;
use crate::pex::Pex;
use crate::pool::Pool;

/// Cloneable handle that drives the fixed-order shutdown sequence.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    quit: broadcast::Sender<()>,
    done: watch::Receiver<bool>,
    pool: Arc<dyn Pool>,
    gateway: Gateway,
    pex: Arc<dyn Pex>,
}

impl ShutdownCoordinator {
    pub(crate) fn new(
        quit: broadcast::Sender<()>,
        done: watch::Receiver<bool>,
        pool: Arc<dyn Pool>,
        gateway: Gateway,
        pex: Arc<dyn Pex>,
    ) -> Self {
        Self {
            quit,
            done,
            pool,
            gateway,
            pex,
        }
    }

    /// Stop everything. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("stopping the daemon run loop");
        let _ = self.quit.send(());

        tracing::info!("shutting down pool");
        self.pool.shutdown();

        tracing::info!("shutting down gateway");
        self.gateway.shutdown();

        tracing::info!("shutting down pex");
        self.pex.shutdown();

        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
        tracing::info!("daemon shutdown complete");
    }

    /// Run the shutdown sequence once the process is asked to terminate.
    pub async fn wait_for_signal(&self) {
        let signal = obol_utils::signal::termination().await;
        tracing::info!(signal, "termination signal, shutting down");
        self.shutdown().await;
    }
}
