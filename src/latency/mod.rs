//! Latency generation strategies.
//!
//! A [`LatencyGenerator`] decides how long each chunk of proxied data is
//! held back. One generator instance is shared by every connection and
//! both directions, so implementations must be cheap to call concurrently.

mod fixed;
mod waveform;

pub use fixed::FixedLatency;
pub use waveform::{Wave, WaveTerm, WaveformLatency};

use crate::config::LatencyConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for per-chunk delay strategies.
pub trait LatencyGenerator: Send + Sync {
    /// Produce the delay for the next chunk.
    ///
    /// Never fails. A degenerate configuration yields a constant (possibly
    /// zero) duration.
    fn generate(&self) -> Duration;
}

/// Build the default generator for a latency configuration.
///
/// `start` is the reference instant that time-varying terms are measured
/// against. A configuration with no waveform terms and no jitter collapses
/// to a [`FixedLatency`].
pub fn build_generator(config: &LatencyConfig, start: Instant) -> Arc<dyn LatencyGenerator> {
    let waveform = WaveformLatency::from_config(config, start);
    if waveform.is_constant() {
        Arc::new(FixedLatency::new(config.base))
    } else {
        Arc::new(waveform)
    }
}
