//! Prometheus metrics for the daemon core.
//!
//! The [`DaemonMetrics`] struct owns a dedicated [`Registry`] the host can
//! encode into the text exposition format. Gauges are updated only from
//! the run loop.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

/// Connection and message metrics.
pub struct DaemonMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    /// Current number of rows in the connection table.
    pub connections: IntGauge,
    /// Current number of outgoing rows.
    pub outgoing_connections: IntGauge,
    /// Current number of pending dials.
    pub pending_connections: IntGauge,

    /// Total inbound messages dispatched.
    pub messages_received: IntCounter,
    /// Total connections rejected at admission.
    pub connections_rejected: IntCounter,
}

impl DaemonMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections = register_int_gauge_with_registry!(
            Opts::new("obol_connections", "Current connection table size"),
            registry
        )
        .expect("failed to register connections gauge");

        let outgoing_connections = register_int_gauge_with_registry!(
            Opts::new(
                "obol_outgoing_connections",
                "Current outgoing connection count"
            ),
            registry
        )
        .expect("failed to register outgoing_connections gauge");

        let pending_connections = register_int_gauge_with_registry!(
            Opts::new("obol_pending_connections", "Current pending dial count"),
            registry
        )
        .expect("failed to register pending_connections gauge");

        let messages_received = register_int_counter_with_registry!(
            Opts::new(
                "obol_messages_received_total",
                "Total inbound messages dispatched"
            ),
            registry
        )
        .expect("failed to register messages_received counter");

        let connections_rejected = register_int_counter_with_registry!(
            Opts::new(
                "obol_connections_rejected_total",
                "Total connections rejected at admission"
            ),
            registry
        )
        .expect("failed to register connections_rejected counter");

        Self {
            registry,
            connections,
            outgoing_connections,
            pending_connections,
            messages_received,
            connections_rejected,
        }
    }
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}
