//! Configuration data types.

use crate::proxy::DEFAULT_QUEUE_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeedbumpConfig {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// IP or hostname to listen on (all interfaces if empty)
    #[serde(default)]
    pub host: String,

    /// Local port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Destination address in host:port format
    #[serde(default)]
    pub destination: String,

    /// Maximum number of bytes per socket read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Chunks buffered per direction before the reader stalls (0 means default)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Timeout for dialing the destination
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Start without injecting latency until enabled at runtime
    #[serde(default)]
    pub disabled: bool,

    /// Latency shape
    #[serde(default)]
    pub latency: LatencyConfig,

    /// Admin HTTP endpoint
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for SpeedbumpConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            host: String::new(),
            port: default_port(),
            destination: String::new(),
            buffer_size: default_buffer_size(),
            queue_size: default_queue_size(),
            connect_timeout: default_connect_timeout(),
            disabled: false,
            latency: LatencyConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl SpeedbumpConfig {
    /// Listen address in host:port form. IPv6 hosts are bracketed.
    pub fn listen_address(&self) -> String {
        let host = self.host.as_str();
        if host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Queue size with the default applied for an unset (zero) value.
    pub fn effective_queue_size(&self) -> usize {
        if self.queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            self.queue_size
        }
    }
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Latency summands.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LatencyConfig {
    /// Constant delay applied to every chunk
    #[serde(default = "default_base_latency", with = "humantime_serde")]
    pub base: Duration,

    /// Upper bound of a uniformly distributed extra delay
    #[serde(default, with = "humantime_serde")]
    pub jitter: Duration,

    #[serde(default)]
    pub sine: WaveConfig,

    #[serde(default)]
    pub square: WaveConfig,

    #[serde(default)]
    pub triangle: WaveConfig,

    #[serde(default)]
    pub sawtooth: WaveConfig,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            base: default_base_latency(),
            jitter: Duration::ZERO,
            sine: WaveConfig::default(),
            square: WaveConfig::default(),
            triangle: WaveConfig::default(),
            sawtooth: WaveConfig::default(),
        }
    }
}

/// A periodic latency term. A zero period disables the term.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WaveConfig {
    #[serde(default, with = "humantime_serde")]
    pub amplitude: Duration,

    #[serde(default, with = "humantime_serde")]
    pub period: Duration,
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Whether the admin endpoint is served
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the admin server
    #[serde(default = "default_admin_address")]
    pub address: SocketAddr,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_admin_address(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_port() -> u16 {
    8000
}

fn default_buffer_size() -> usize {
    16 * 1024
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_base_latency() -> Duration {
    Duration::from_millis(5)
}

fn default_admin_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
