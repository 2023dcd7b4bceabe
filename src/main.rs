//! speedbump - a TCP proxy that injects latency
//!
//! Usage:
//!     speedbump [OPTIONS] [DESTINATION]
//!     speedbump --config <path>
//!
//! See --help for more options.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use speedbump::admin::AdminServer;
use speedbump::config::{load_config_unvalidated, validate_config, SpeedbumpConfig, WaveConfig};
use speedbump::util::init_logging;
use speedbump::Speedbump;

/// A TCP proxy that adds configurable, time-varying latency.
#[derive(Parser, Debug)]
#[command(name = "speedbump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Destination address (host:port)
    #[arg(value_name = "DESTINATION")]
    destination: Option<String>,

    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host to listen on (empty for all interfaces)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Size of the read buffer per direction, in bytes
    #[arg(long, value_name = "BYTES")]
    buffer: Option<usize>,

    /// Maximum number of delayed chunks per direction
    #[arg(long)]
    queue_size: Option<usize>,

    /// Base latency added to every chunk (e.g. 100ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    latency: Option<Duration>,

    /// Upper bound of uniformly distributed extra latency
    #[arg(long, value_parser = humantime::parse_duration)]
    jitter: Option<Duration>,

    /// Amplitude of the sine latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    sine_amplitude: Option<Duration>,

    /// Period of the sine latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    sine_period: Option<Duration>,

    /// Amplitude of the square latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    square_amplitude: Option<Duration>,

    /// Period of the square latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    square_period: Option<Duration>,

    /// Amplitude of the triangle latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    triangle_amplitude: Option<Duration>,

    /// Period of the triangle latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    triangle_period: Option<Duration>,

    /// Amplitude of the sawtooth latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    saw_amplitude: Option<Duration>,

    /// Period of the sawtooth latency summand
    #[arg(long, value_parser = humantime::parse_duration)]
    saw_period: Option<Duration>,

    /// Start with latency injection disabled
    #[arg(long)]
    disabled: bool,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Cli {
    /// Apply command line overrides on top of `config`.
    fn apply(&self, config: &mut SpeedbumpConfig) {
        if let Some(destination) = &self.destination {
            config.destination = destination.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(buffer) = self.buffer {
            config.buffer_size = buffer;
        }
        if let Some(queue_size) = self.queue_size {
            config.queue_size = queue_size;
        }
        if let Some(latency) = self.latency {
            config.latency.base = latency;
        }
        if let Some(jitter) = self.jitter {
            config.latency.jitter = jitter;
        }
        override_wave(&mut config.latency.sine, self.sine_amplitude, self.sine_period);
        override_wave(&mut config.latency.square, self.square_amplitude, self.square_period);
        override_wave(&mut config.latency.triangle, self.triangle_amplitude, self.triangle_period);
        override_wave(&mut config.latency.sawtooth, self.saw_amplitude, self.saw_period);
        if self.disabled {
            config.disabled = true;
        }
        if let Some(level) = &self.log_level {
            config.global.log_level = level.clone();
        }
    }
}

fn override_wave(wave: &mut WaveConfig, amplitude: Option<Duration>, period: Option<Duration>) {
    if let Some(amplitude) = amplitude {
        wave.amplitude = amplitude;
    }
    if let Some(period) = period {
        wave.period = period;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_unvalidated(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => SpeedbumpConfig::default(),
    };
    cli.apply(&mut config);

    validate_config(&config)
        .map_err(|e| anyhow!(e))
        .context("invalid configuration")?;

    init_logging(&config.global.log_level, &config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.listen_address());
        println!("  Destination: {}", config.destination);
        println!(
            "  Latency: base {} jitter {}",
            humantime::format_duration(config.latency.base),
            humantime::format_duration(config.latency.jitter)
        );
        return Ok(());
    }

    info!(
        listen = %config.listen_address(),
        destination = %config.destination,
        base = ?config.latency.base,
        jitter = ?config.latency.jitter,
        disabled = config.disabled,
        "speedbump starting"
    );

    run(config)
}

/// Run the proxy with the given configuration.
fn run(config: SpeedbumpConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

async fn run_async(config: SpeedbumpConfig) -> Result<()> {
    let speedbump = Arc::new(
        Speedbump::new(&config)
            .await
            .context("failed to create speedbump")?,
    );

    let listen = speedbump
        .start()
        .await
        .with_context(|| format!("failed to start listener on '{}'", config.listen_address()))?;

    let admin = if config.admin.enabled {
        let server = AdminServer::bind(config.admin.address, Arc::clone(&speedbump))
            .await
            .with_context(|| {
                format!("failed to bind admin server on {}", config.admin.address)
            })?;
        Some(tokio::spawn(server.run(speedbump.shutdown_listener())))
    } else {
        None
    };

    info!(listen = %listen, "speedbump is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    speedbump.stop().await;

    if let Some(admin) = admin {
        if let Err(e) = admin.await {
            warn!(error = %e, "admin server task failed");
        }
    }

    info!("speedbump shut down complete");
    Ok(())
}
