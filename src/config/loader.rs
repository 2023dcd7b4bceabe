//! Configuration file loading.

use crate::config::{validate_config, SpeedbumpConfig};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// Reads the file, parses the YAML, and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SpeedbumpConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: SpeedbumpConfig = serde_yaml::from_str(&contents)?;

    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

/// Load configuration from a YAML file without validating it.
///
/// Used when command line flags still have to be applied on top.
pub fn load_config_unvalidated<P: AsRef<Path>>(path: P) -> Result<SpeedbumpConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_yaml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
destination: "127.0.0.1:9000"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.destination, "127.0.0.1:9000");
        assert_eq!(config.port, 8000);
        assert_eq!(config.latency.base, Duration::from_millis(5));
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: json
host: 127.0.0.1
port: 2000
destination: "localhost:80"
buffer_size: 4096
queue_size: 64
connect_timeout: 2s
disabled: true
latency:
  base: 100ms
  jitter: 10ms
  square:
    amplitude: 50ms
    period: 30s
admin:
  enabled: true
  address: "127.0.0.1:9191"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.port, 2000);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert!(config.disabled);
        assert_eq!(config.latency.square.period, Duration::from_secs(30));
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_fails_validation() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"port: 2000\n").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));

        // Still parseable when validation is deferred
        let config = load_config_unvalidated(file.path()).unwrap();
        assert_eq!(config.port, 2000);
    }
}
