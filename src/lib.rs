//! speedbump - a TCP proxy that injects latency
//!
//! Every chunk read from either side of a proxied connection is held for a
//! computed delay before being written to the other side. The delay is a
//! base value plus optional jitter and periodic waveforms, so a network
//! path can be slowed down in a controlled, time-varying way for testing.
//!
//! - Per-direction FIFO delay queues with backpressure
//! - Sine, square, triangle and sawtooth latency waveforms
//! - Runtime enable/disable across all live connections
//! - YAML configuration, Prometheus metrics, admin HTTP endpoint

pub mod admin;
pub mod config;
pub mod frontend;
pub mod latency;
pub mod metrics;
pub mod proxy;
pub mod speedbump;
pub mod util;

pub use config::SpeedbumpConfig;
pub use speedbump::{Speedbump, SpeedbumpError};
