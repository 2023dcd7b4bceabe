//! Frontend listener implementation.
//!
//! Accepts client connections, dials the destination for each one, and
//! runs the resulting [`ProxyConnection`]s until shutdown.

use crate::frontend::ConnectionRegistry;
use crate::latency::LatencyGenerator;
use crate::metrics::MetricsCollector;
use crate::proxy::{DelayGate, ProxyConnection, ProxySettings};
use crate::util::{ConnectionId, ConnectionIdGenerator, ShutdownListener, ShutdownSignal};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Everything a connection needs from the instance that accepted it.
#[derive(Clone)]
pub struct ListenerContext {
    /// Resolved destination address.
    pub destination: SocketAddr,
    /// Sizing for new connections. `enabled` is taken from `gate` instead.
    pub settings: ProxySettings,
    /// Shared latency strategy.
    pub latency: Arc<dyn LatencyGenerator>,
    /// Instance-wide enabled flag applied to new connections.
    pub gate: DelayGate,
    /// Live connections, for instance-wide toggles.
    pub registry: Arc<ConnectionRegistry>,
    /// Fired to tear down every connection.
    pub shutdown: ShutdownSignal,
    /// Metrics collector.
    pub metrics: MetricsCollector,
}

/// Frontend listener that accepts and proxies connections.
pub struct FrontendListener {
    listener: TcpListener,
    context: ListenerContext,
    ids: ConnectionIdGenerator,
}

impl FrontendListener {
    /// Bind the listening socket.
    pub async fn bind(address: SocketAddr, context: ListenerContext) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        info!(
            listen = %listener.local_addr()?,
            destination = %context.destination,
            "frontend listener bound"
        );

        Ok(Self {
            listener,
            context,
            ids: ConnectionIdGenerator::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait for every connection
    /// to finish.
    #[instrument(skip_all, fields(destination = %self.context.destination))]
    pub async fn run(self, mut shutdown: ShutdownListener) {
        info!("frontend listener starting");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let context = self.context.clone();
                            let id = self.ids.next_id();
                            connections.spawn(handle_connection(stream, addr, id, context));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                // Reap finished connection tasks
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "connection task failed");
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }

        drop(self.listener);
        debug!(remaining = connections.len(), "waiting for active connections to close");
        while let Some(result) = connections.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "connection task failed");
            }
        }
        info!("frontend listener stopped");
    }
}

/// Dial, register, and run one connection.
async fn handle_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    id: ConnectionId,
    context: ListenerContext,
) {
    let settings = ProxySettings {
        enabled: context.gate.is_enabled(),
        ..context.settings.clone()
    };
    let mut shutdown = context.shutdown.subscribe();

    let connect = ProxyConnection::connect(
        id,
        stream,
        context.destination,
        settings,
        Arc::clone(&context.latency),
        context.shutdown.subscribe(),
    );

    let connection = tokio::select! {
        result = connect => result,
        _ = shutdown.recv() => {
            debug!(connection = %id, "shutdown while dialing destination");
            return;
        }
    };

    let connection = match connection {
        Ok(connection) => connection.with_metrics(context.metrics.clone()),
        Err(e) => {
            warn!(connection = %id, client = %client_addr, error = %e, "creating proxy connection failed");
            context.metrics.dial_failed();
            return;
        }
    };

    let handle = connection.handle();
    context.registry.insert(handle.clone());
    // Re-read the instance flag after registering so a toggle racing with
    // registration is not lost.
    if context.gate.is_enabled() {
        handle.enable();
    } else {
        handle.disable();
    }

    context.metrics.connection_opened();
    info!(connection = %id, client = %client_addr, "proxy connection established");

    connection.run().await;

    context.registry.remove(id);
    context.metrics.connection_closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::FixedLatency;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn context(destination: SocketAddr) -> ListenerContext {
        ListenerContext {
            destination,
            settings: ProxySettings::default(),
            latency: Arc::new(FixedLatency::new(Duration::ZERO)),
            gate: DelayGate::new(true),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: ShutdownSignal::new(),
            metrics: MetricsCollector::new(),
        }
    }

    #[tokio::test]
    async fn test_frontend_listener_bind() {
        let listener = FrontendListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            context("127.0.0.1:9".parse().unwrap()),
        )
        .await;
        assert!(listener.is_ok());
        assert_ne!(listener.unwrap().local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_dial_failure_drops_client() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let destination = unused.local_addr().unwrap();
        drop(unused);

        let context = context(destination);
        let metrics = context.metrics.clone();
        let registry = Arc::clone(&context.registry);
        let signal = context.shutdown.clone();

        let listener = FrontendListener::bind("127.0.0.1:0".parse().unwrap(), context)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(listener.run(signal.subscribe()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut [0u8; 1]))
            .await
            .expect("client was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(registry.is_empty());

        signal.shutdown();
        task.await.unwrap();

        let mut output = String::new();
        prometheus_client::encoding::text::encode(&mut output, metrics.registry()).unwrap();
        assert!(output.contains("speedbump_dial_failures_total 1"));
    }
}
