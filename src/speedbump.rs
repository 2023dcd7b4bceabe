//! A running proxy instance.

use crate::config::SpeedbumpConfig;
use crate::frontend::{ConnectionRegistry, FrontendListener, ListenerContext};
use crate::latency::{build_generator, LatencyGenerator};
use crate::metrics::MetricsCollector;
use crate::proxy::{DelayGate, ProxySettings};
use crate::util::{ShutdownListener, ShutdownSignal};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::lookup_host;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors fatal to starting a proxy instance.
#[derive(Debug, thiserror::Error)]
pub enum SpeedbumpError {
    #[error("failed to resolve {kind} address '{address}': {source}")]
    Resolve {
        kind: &'static str,
        address: String,
        source: io::Error,
    },

    #[error("failed to bind listener on {0}: {1}")]
    Bind(SocketAddr, io::Error),

    #[error("speedbump is already started")]
    AlreadyStarted,
}

struct Running {
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
}

/// Proxy instance: one listening socket mirrored to one destination.
pub struct Speedbump {
    listen_addr: SocketAddr,
    destination: SocketAddr,
    settings: ProxySettings,
    latency: Arc<dyn LatencyGenerator>,
    gate: DelayGate,
    registry: Arc<ConnectionRegistry>,
    /// Signal for the current run. Replaced by `start` once fired.
    shutdown: Mutex<ShutdownSignal>,
    metrics: MetricsCollector,
    running: Mutex<Option<Running>>,
}

impl Speedbump {
    /// Resolve addresses and build the latency generator.
    ///
    /// The generator's reference start time is captured here.
    pub async fn new(config: &SpeedbumpConfig) -> Result<Self, SpeedbumpError> {
        let listen_addr = resolve("listen", &config.listen_address()).await?;
        let destination = resolve("destination", &config.destination).await?;

        let settings = ProxySettings {
            buffer_size: config.buffer_size,
            queue_size: config.effective_queue_size(),
            connect_timeout: config.connect_timeout,
            enabled: !config.disabled,
        };

        let metrics = MetricsCollector::new();
        metrics.set_delay_enabled(settings.enabled);

        Ok(Self {
            listen_addr,
            destination,
            gate: DelayGate::new(settings.enabled),
            settings,
            latency: build_generator(&config.latency, Instant::now()),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Mutex::new(ShutdownSignal::new()),
            metrics,
            running: Mutex::new(None),
        })
    }

    /// Replace the latency strategy. Only affects connections accepted later.
    pub fn with_latency_generator(mut self, latency: Arc<dyn LatencyGenerator>) -> Self {
        self.latency = latency;
        self
    }

    /// Bind the listener and start accepting in the background.
    ///
    /// Returns once the proxy is listening, with the bound address. A
    /// stopped instance can be started again.
    pub async fn start(&self) -> Result<SocketAddr, SpeedbumpError> {
        if self.running.lock().is_some() {
            return Err(SpeedbumpError::AlreadyStarted);
        }

        let shutdown = {
            let current = self.shutdown.lock();
            if current.is_shutdown() {
                ShutdownSignal::new()
            } else {
                current.clone()
            }
        };

        let context = ListenerContext {
            destination: self.destination,
            settings: self.settings.clone(),
            latency: Arc::clone(&self.latency),
            gate: self.gate.clone(),
            registry: Arc::clone(&self.registry),
            shutdown: shutdown.clone(),
            metrics: self.metrics.clone(),
        };

        let listener = FrontendListener::bind(self.listen_addr, context)
            .await
            .map_err(|e| SpeedbumpError::Bind(self.listen_addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SpeedbumpError::Bind(self.listen_addr, e))?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SpeedbumpError::AlreadyStarted);
        }
        let handle = tokio::spawn(listener.run(shutdown.subscribe()));
        *self.shutdown.lock() = shutdown;
        *running = Some(Running {
            local_addr,
            listener: handle,
        });

        info!(
            listen = %local_addr,
            destination = %self.destination,
            enabled = self.is_enabled(),
            "started speedbump"
        );
        Ok(local_addr)
    }

    /// Stop accepting, tear down every connection, and wait for them.
    pub async fn stop(&self) {
        info!("stopping speedbump");
        self.shutdown.lock().shutdown();

        let running = self.running.lock().take();
        if let Some(running) = running {
            debug!("waiting for active connections to be closed");
            if let Err(e) = running.listener.await {
                tracing::error!(error = %e, "listener task failed");
            }
        }
        info!("speedbump stopped");
    }

    /// Inject latency on every current and future connection.
    pub fn enable(&self) {
        self.gate.set(true);
        self.registry.enable_all();
        self.metrics.set_delay_enabled(true);
        info!(connections = self.registry.len(), "latency injection enabled");
    }

    /// Forward without added latency on every current and future connection.
    pub fn disable(&self) {
        self.gate.set(false);
        self.registry.disable_all();
        self.metrics.set_delay_enabled(false);
        info!(connections = self.registry.len(), "latency injection disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// Number of connections currently proxied.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Resolved destination address.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Listener that fires on the next `stop`.
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.lock().subscribe()
    }
}

async fn resolve(kind: &'static str, address: &str) -> Result<SocketAddr, SpeedbumpError> {
    let error = |source| SpeedbumpError::Resolve {
        kind,
        address: address.to_string(),
        source,
    };

    lookup_host(address)
        .await
        .map_err(error)?
        .next()
        .ok_or_else(|| error(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(destination: &str) -> SpeedbumpConfig {
        SpeedbumpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            destination: destination.to_string(),
            ..SpeedbumpConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_resolves_addresses() {
        let speedbump = Speedbump::new(&config("127.0.0.1:9000")).await.unwrap();
        assert_eq!(speedbump.destination(), "127.0.0.1:9000".parse().unwrap());
        assert!(speedbump.is_enabled());
        assert!(speedbump.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_destination() {
        let result = Speedbump::new(&config("not an address")).await;
        assert!(matches!(
            result,
            Err(SpeedbumpError::Resolve { kind: "destination", .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_config() {
        let mut config = config("127.0.0.1:9000");
        config.disabled = true;
        let speedbump = Speedbump::new(&config).await.unwrap();
        assert!(!speedbump.is_enabled());

        speedbump.enable();
        assert!(speedbump.is_enabled());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let speedbump = Speedbump::new(&config("127.0.0.1:9000")).await.unwrap();
        let addr = speedbump.start().await.unwrap();
        assert_eq!(speedbump.local_addr(), Some(addr));

        assert!(matches!(
            speedbump.start().await,
            Err(SpeedbumpError::AlreadyStarted)
        ));

        speedbump.stop().await;
        assert!(speedbump.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let echo = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let destination = echo.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = echo.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = stream.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });

        let mut config = config(&destination.to_string());
        config.latency.base = Duration::ZERO;
        let speedbump = Speedbump::new(&config).await.unwrap();

        let stopped = speedbump.shutdown_listener();
        speedbump.start().await.unwrap();
        speedbump.stop().await;
        assert!(stopped.is_shutdown());

        let addr = speedbump.start().await.unwrap();
        assert_eq!(speedbump.local_addr(), Some(addr));
        assert!(!speedbump.shutdown_listener().is_shutdown());

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"again").await.unwrap();
        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("restarted proxy did not forward")
            .unwrap();
        assert_eq!(&buf, b"again");

        speedbump.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config("127.0.0.1:9000");
        config.port = taken.local_addr().unwrap().port();

        let speedbump = Speedbump::new(&config).await.unwrap();
        assert!(matches!(speedbump.start().await, Err(SpeedbumpError::Bind(_, _))));
    }
}
