//! Prometheus metrics.

mod collector;

pub use collector::{BytesLabels, MetricsCollector};
