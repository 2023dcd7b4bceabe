//! Configuration validation.

use crate::config::{SpeedbumpConfig, WaveConfig};
use std::time::Duration;

/// Largest accepted base, jitter or waveform amplitude.
pub const MAX_LATENCY: Duration = Duration::from_secs(24 * 60 * 60);

/// Validate the configuration.
///
/// Checks for:
/// - A destination in host:port form
/// - A non-zero read buffer
/// - Waveform terms with an amplitude but no period
/// - Latency summands above [`MAX_LATENCY`]
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &SpeedbumpConfig) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.destination.is_empty() {
        errors.push("destination address must be specified".to_string());
    } else if !has_port(&config.destination) {
        errors.push(format!(
            "destination '{}' must be in host:port format",
            config.destination
        ));
    }

    if config.buffer_size == 0 {
        errors.push("buffer_size must be greater than 0".to_string());
    }

    if config.connect_timeout.is_zero() {
        errors.push("connect_timeout must be greater than 0".to_string());
    }

    let summands = [
        ("latency base", config.latency.base),
        ("latency jitter", config.latency.jitter),
        ("sine amplitude", config.latency.sine.amplitude),
        ("square amplitude", config.latency.square.amplitude),
        ("triangle amplitude", config.latency.triangle.amplitude),
        ("sawtooth amplitude", config.latency.sawtooth.amplitude),
    ];
    for (name, value) in summands {
        if value > MAX_LATENCY {
            errors.push(format!(
                "{} of {} exceeds the maximum of {}",
                name,
                humantime::format_duration(value),
                humantime::format_duration(MAX_LATENCY)
            ));
        }
    }

    let waves: [(&str, &WaveConfig); 4] = [
        ("sine", &config.latency.sine),
        ("square", &config.latency.square),
        ("triangle", &config.latency.triangle),
        ("sawtooth", &config.latency.sawtooth),
    ];
    for (name, wave) in waves {
        if !wave.amplitude.is_zero() && wave.period.is_zero() {
            errors.push(format!(
                "{} wave has an amplitude of {} but no period",
                name,
                humantime::format_duration(wave.amplitude)
            ));
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

fn has_port(address: &str) -> bool {
    address
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false)
}
