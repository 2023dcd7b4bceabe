//! A single proxied client connection.
//!
//! Owns the client socket, the dialed destination socket, and the two
//! [`DirectionalPipe`]s between them. Lifecycle:
//! `Created → Running → Closing → Closed`.

use crate::latency::LatencyGenerator;
use crate::metrics::MetricsCollector;
use crate::proxy::delay_queue::DelayQueue;
use crate::proxy::pipe::{DelayGate, Direction, DirectionalPipe, PipeEnd, PipeReport};
use crate::util::{ConnectionId, ShutdownListener, ShutdownSignal};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Default chunks buffered per direction when the caller passes zero.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Connection error.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to dial destination {0}: {1}")]
    Dial(SocketAddr, io::Error),

    #[error("timed out dialing destination {0}")]
    DialTimeout(SocketAddr),

    #[error("client socket error: {0}")]
    Client(io::Error),

    #[error("invalid connection settings: {0}")]
    InvalidSettings(String),
}

/// Sizing and behaviour of a proxied connection.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Maximum bytes per socket read.
    pub buffer_size: usize,
    /// Chunks buffered per direction before the reader stalls.
    pub queue_size: usize,
    /// Timeout for dialing the destination.
    pub connect_timeout: Duration,
    /// Whether latency is injected from the start.
    pub enabled: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            queue_size: DEFAULT_QUEUE_SIZE,
            connect_timeout: Duration::from_secs(10),
            enabled: true,
        }
    }
}

impl ProxySettings {
    fn validated(mut self) -> Result<Self, ConnectionError> {
        if self.buffer_size == 0 {
            return Err(ConnectionError::InvalidSettings(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        if self.queue_size == 0 {
            self.queue_size = DEFAULT_QUEUE_SIZE;
        }
        Ok(self)
    }
}

/// Lifecycle state of a [`ProxyConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Created = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Created,
            1 => ConnectionState::Running,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug)]
struct Shared {
    gate: DelayGate,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_enabled(&self, enabled: bool) {
        if self.state() != ConnectionState::Closed {
            self.gate.set(enabled);
        }
    }
}

/// Cloneable handle for toggling a connection from another task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// A handle not attached to any running connection.
    #[cfg(test)]
    pub(crate) fn detached(id: ConnectionId, enabled: bool) -> Self {
        Self {
            id,
            shared: Arc::new(Shared {
                gate: DelayGate::new(enabled),
                state: AtomicU8::new(ConnectionState::Created as u8),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Start injecting latency. No-op once closed.
    pub fn enable(&self) {
        self.shared.set_enabled(true);
    }

    /// Stop injecting latency. Chunks already queued keep their schedule.
    pub fn disable(&self) {
        self.shared.set_enabled(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.gate.is_enabled()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

/// Totals for a finished connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSummary {
    /// Bytes sent from client to destination.
    pub bytes_upstream: u64,
    /// Bytes sent from destination to client.
    pub bytes_downstream: u64,
    pub duration: Duration,
}

/// One client connection mirrored to the destination with injected latency.
pub struct ProxyConnection {
    id: ConnectionId,
    client: TcpStream,
    client_addr: SocketAddr,
    destination: TcpStream,
    destination_addr: SocketAddr,
    settings: ProxySettings,
    latency: Arc<dyn LatencyGenerator>,
    shutdown: ShutdownListener,
    shared: Arc<Shared>,
    metrics: Option<MetricsCollector>,
}

impl ProxyConnection {
    /// Validate settings and dial the destination for an accepted client.
    ///
    /// On error the client stream is dropped, closing it.
    #[instrument(skip_all, fields(connection = %id, destination = %destination_addr))]
    pub async fn connect(
        id: ConnectionId,
        client: TcpStream,
        destination_addr: SocketAddr,
        settings: ProxySettings,
        latency: Arc<dyn LatencyGenerator>,
        shutdown: ShutdownListener,
    ) -> Result<Self, ConnectionError> {
        let settings = settings.validated()?;
        let client_addr = client.peer_addr().map_err(ConnectionError::Client)?;

        if let Err(e) = client.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let destination = dial_destination(destination_addr, settings.connect_timeout).await?;

        let shared = Arc::new(Shared {
            gate: DelayGate::new(settings.enabled),
            state: AtomicU8::new(ConnectionState::Created as u8),
        });

        Ok(Self {
            id,
            client,
            client_addr,
            destination,
            destination_addr,
            settings,
            latency,
            shutdown,
            shared,
            metrics: None,
        })
    }

    /// Record delays and forwarded bytes in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Handle for toggling latency after `run` has taken ownership.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn enable(&self) {
        self.shared.set_enabled(true);
    }

    pub fn disable(&self) {
        self.shared.set_enabled(false);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Proxy until either side closes or shutdown fires.
    ///
    /// Peer-initiated closure is the normal way for this to end, so there
    /// is no error result.
    #[instrument(skip_all, fields(
        connection = %self.id,
        client = %self.client_addr,
        destination = %self.destination_addr
    ))]
    pub async fn run(self) -> ConnectionSummary {
        let started = Instant::now();
        let shared = self.shared;
        shared.set_state(ConnectionState::Running);
        debug!("proxy connection running");

        let closing = ShutdownSignal::new();
        let upstream_queue = Arc::new(DelayQueue::new(self.settings.queue_size));
        let downstream_queue = Arc::new(DelayQueue::new(self.settings.queue_size));

        let build_pipe = |direction: Direction, queue: &Arc<DelayQueue>| {
            let pipe = DirectionalPipe::new(
                direction,
                self.settings.buffer_size,
                Arc::clone(queue),
                Arc::clone(&self.latency),
                shared.gate.clone(),
            );
            match &self.metrics {
                Some(metrics) => pipe.with_metrics(metrics.clone()),
                None => pipe,
            }
        };
        let upstream = build_pipe(Direction::Upstream, &upstream_queue);
        let downstream = build_pipe(Direction::Downstream, &downstream_queue);

        let (client_read, client_write) = self.client.into_split();
        let (destination_read, destination_write) = self.destination.into_split();

        let mut upstream_task =
            tokio::spawn(upstream.run(client_read, destination_write, closing.subscribe()));
        let mut downstream_task =
            tokio::spawn(downstream.run(destination_read, client_write, closing.subscribe()));

        let mut shutdown = self.shutdown;
        let mut upstream_result = None;
        let mut downstream_result = None;

        tokio::select! {
            result = &mut upstream_task => upstream_result = Some(result),
            result = &mut downstream_task => downstream_result = Some(result),
            _ = shutdown.recv() => debug!("shutdown requested"),
        }

        shared.set_state(ConnectionState::Closing);
        closing.shutdown();
        upstream_queue.close();
        downstream_queue.close();

        let upstream_result = match upstream_result {
            Some(result) => result,
            None => upstream_task.await,
        };
        let downstream_result = match downstream_result {
            Some(result) => result,
            None => downstream_task.await,
        };

        let upstream = joined(Direction::Upstream, upstream_result);
        let downstream = joined(Direction::Downstream, downstream_result);
        shared.set_state(ConnectionState::Closed);

        let summary = ConnectionSummary {
            bytes_upstream: upstream.bytes_forwarded,
            bytes_downstream: downstream.bytes_forwarded,
            duration: started.elapsed(),
        };

        info!(
            bytes_upstream = summary.bytes_upstream,
            bytes_downstream = summary.bytes_downstream,
            upstream_end = ?upstream.end,
            downstream_end = ?downstream.end,
            duration_ms = summary.duration.as_millis() as u64,
            "proxy connection closed"
        );

        summary
    }
}

fn joined(direction: Direction, result: Result<PipeReport, JoinError>) -> PipeReport {
    result.unwrap_or_else(|e| {
        error!(direction = %direction, error = %e, "pipe task failed");
        PipeReport {
            direction,
            bytes_forwarded: 0,
            end: PipeEnd::Cancelled,
        }
    })
}

/// Connect to the destination with a timeout.
#[instrument(skip_all, fields(destination = %addr))]
pub async fn dial_destination(
    addr: SocketAddr,
    connect_timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    debug!("dialing destination");

    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY on destination connection");
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectionError::Dial(addr, e)),
        Err(_) => Err(ConnectionError::DialTimeout(addr)),
    }
}
