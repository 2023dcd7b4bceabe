//! Metrics collector using prometheus-client.
//!
//! Tracks connections, forwarded bytes, and the delays injected into
//! proxied traffic.

use crate::proxy::Direction;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for bytes transferred metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub direction: Direction,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Total connections accepted and dialed.
    connections_total: Counter,
    /// Connections currently proxied.
    active_connections: Gauge,
    /// Failed destination dials.
    dial_failures_total: Counter,
    /// Bytes forwarded per direction.
    bytes_total: Family<BytesLabels, Counter>,
    /// Delay injected per chunk (in seconds).
    injected_delay_seconds: Histogram,
    /// 1 while latency injection is enabled.
    delay_enabled: Gauge,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connections_total = Counter::default();
        let active_connections = Gauge::default();
        let dial_failures_total = Counter::default();
        let bytes_total = Family::<BytesLabels, Counter>::default();
        // Buckets: 1ms, 2.5ms, 6.25ms, ... ~15s
        let injected_delay_seconds = Histogram::new(exponential_buckets(0.001, 2.5, 12));
        let delay_enabled = Gauge::default();

        registry.register(
            "speedbump_connections",
            "Total number of proxied connections",
            connections_total.clone(),
        );
        registry.register(
            "speedbump_active_connections",
            "Number of active proxied connections",
            active_connections.clone(),
        );
        registry.register(
            "speedbump_dial_failures",
            "Total number of failed destination dials",
            dial_failures_total.clone(),
        );
        registry.register(
            "speedbump_bytes",
            "Total bytes forwarded",
            bytes_total.clone(),
        );
        registry.register(
            "speedbump_injected_delay_seconds",
            "Delay injected per chunk in seconds",
            injected_delay_seconds.clone(),
        );
        registry.register(
            "speedbump_delay_enabled",
            "Whether latency injection is enabled (1=enabled, 0=disabled)",
            delay_enabled.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                connections_total,
                active_connections,
                dial_failures_total,
                bytes_total,
                injected_delay_seconds,
                delay_enabled,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Increment active connections.
    pub fn connection_opened(&self) {
        self.inner.active_connections.inc();
        self.inner.connections_total.inc();
    }

    /// Decrement active connections.
    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }

    /// Record a failed dial to the destination.
    pub fn dial_failed(&self) {
        self.inner.dial_failures_total.inc();
    }

    /// Record bytes forwarded in one direction.
    pub fn record_bytes(&self, direction: Direction, bytes: u64) {
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels { direction })
            .inc_by(bytes);
    }

    /// Record the delay computed for one chunk.
    pub fn observe_delay(&self, delay: Duration) {
        self.inner.injected_delay_seconds.observe(delay.as_secs_f64());
    }

    /// Update the latency injection state.
    pub fn set_delay_enabled(&self, enabled: bool) {
        self.inner.delay_enabled.set(if enabled { 1 } else { 0 });
    }

    /// Current number of active connections.
    pub fn active_connections(&self) -> i64 {
        self.inner.active_connections.get()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
