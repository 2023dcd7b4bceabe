//! One direction of a proxied connection.
//!
//! A pipe runs a reader and a writer concurrently. The reader pulls chunks
//! off the source socket and pushes them into the pipe's [`DelayQueue`]
//! with a delay from the shared [`LatencyGenerator`]; the writer releases
//! them in order to the peer socket. A full queue stalls only the reader.

use crate::latency::LatencyGenerator;
use crate::metrics::MetricsCollector;
use crate::proxy::delay_queue::DelayQueue;
use crate::util::ShutdownListener;
use bytes::Bytes;
use prometheus_client::encoding::{EncodeLabelValue, LabelValueEncoder};
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Direction of data flow through the proxy.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Direction {
    /// Client to destination.
    Upstream,
    /// Destination to client.
    Downstream,
}

impl Direction {
    /// Name used in log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EncodeLabelValue for Direction {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> Result<(), fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

/// Runtime switch for latency injection, shared by both pipes of a connection.
#[derive(Clone, Debug)]
pub struct DelayGate(Arc<AtomicBool>);

impl DelayGate {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

/// Why a pipe stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    /// Source reached end of stream and every queued chunk was delivered.
    Drained,
    /// Reading from the source failed.
    ReadError,
    /// Writing to the peer failed.
    WriteError,
    /// The connection was torn down from outside.
    Cancelled,
}

/// Outcome of a finished pipe.
#[derive(Debug, Clone, Copy)]
pub struct PipeReport {
    pub direction: Direction,
    /// Bytes written to the peer.
    pub bytes_forwarded: u64,
    pub end: PipeEnd,
}

/// Read → delay → write pipeline for one direction.
pub struct DirectionalPipe {
    direction: Direction,
    buffer_size: usize,
    queue: Arc<DelayQueue>,
    latency: Arc<dyn LatencyGenerator>,
    gate: DelayGate,
    metrics: Option<MetricsCollector>,
}

impl DirectionalPipe {
    /// Create a pipe. `buffer_size` bounds a single read.
    pub fn new(
        direction: Direction,
        buffer_size: usize,
        queue: Arc<DelayQueue>,
        latency: Arc<dyn LatencyGenerator>,
        gate: DelayGate,
    ) -> Self {
        Self {
            direction,
            buffer_size: buffer_size.max(1),
            queue,
            latency,
            gate,
            metrics: None,
        }
    }

    /// Record delays and forwarded bytes in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run until the source ends, the peer fails, or `stop` fires.
    ///
    /// The pipe lives as long as its writer: after end of stream the writer
    /// keeps draining the queue, then shuts down the peer's write side.
    pub async fn run<R, W>(self, reader: R, writer: W, stop: ShutdownListener) -> PipeReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug!(direction = %self.direction, "pipe starting");

        let read = self.read_loop(reader, stop.clone());
        let write = self.write_loop(writer, stop);
        tokio::pin!(read, write);

        let mut read_end = None;
        let (bytes_forwarded, write_end) = loop {
            tokio::select! {
                end = &mut read, if read_end.is_none() => {
                    read_end = Some(end);
                }
                result = &mut write => break result,
            }
        };

        let end = match (read_end, write_end) {
            (_, PipeEnd::WriteError) => PipeEnd::WriteError,
            (Some(PipeEnd::ReadError), _) => PipeEnd::ReadError,
            (_, end) => end,
        };

        debug!(
            direction = %self.direction,
            bytes_forwarded,
            end = ?end,
            "pipe finished"
        );

        PipeReport {
            direction: self.direction,
            bytes_forwarded,
            end,
        }
    }

    async fn read_loop<R>(&self, mut reader: R, mut stop: ShutdownListener) -> PipeEnd
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let read = tokio::select! {
                result = reader.read(&mut buf) => result,
                _ = stop.recv() => {
                    self.queue.close();
                    return PipeEnd::Cancelled;
                }
            };

            let n = match read {
                Ok(0) => {
                    trace!(direction = %self.direction, "end of stream");
                    self.queue.finish();
                    return PipeEnd::Drained;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(direction = %self.direction, error = %e, "read failed");
                    self.queue.close();
                    return PipeEnd::ReadError;
                }
            };

            let delay = self.next_delay();
            trace!(
                direction = %self.direction,
                bytes = n,
                delay_ms = delay.as_millis() as u64,
                "chunk queued"
            );

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            if self.queue.enqueue(chunk, delay).await.is_err() {
                return PipeEnd::Cancelled;
            }
        }
    }

    async fn write_loop<W>(&self, mut writer: W, mut stop: ShutdownListener) -> (u64, PipeEnd)
    where
        W: AsyncWrite + Unpin,
    {
        let mut forwarded = 0u64;

        loop {
            let chunk = tokio::select! {
                result = self.queue.dequeue() => result,
                _ = stop.recv() => return (forwarded, PipeEnd::Cancelled),
            };

            let data = match chunk {
                Ok(data) => data,
                Err(_) if self.queue.is_closed() => return (forwarded, PipeEnd::Cancelled),
                Err(_) => {
                    // Finished and drained: pass the end of stream on.
                    if let Err(e) = writer.shutdown().await {
                        debug!(direction = %self.direction, error = %e, "shutdown of peer write side failed");
                    }
                    return (forwarded, PipeEnd::Drained);
                }
            };

            let written = tokio::select! {
                result = writer.write_all(&data) => result,
                _ = stop.recv() => return (forwarded, PipeEnd::Cancelled),
            };

            if let Err(e) = written {
                debug!(direction = %self.direction, error = %e, "write failed");
                self.queue.close();
                return (forwarded, PipeEnd::WriteError);
            }

            forwarded += data.len() as u64;
            if let Some(metrics) = &self.metrics {
                metrics.record_bytes(self.direction, data.len() as u64);
            }
        }
    }

    /// Delay for the next chunk. Zero while injection is disabled; the chunk
    /// still queues behind anything delayed before that.
    fn next_delay(&self) -> Duration {
        if !self.gate.is_enabled() {
            return Duration::ZERO;
        }

        let delay = self.latency.generate();
        if let Some(metrics) = &self.metrics {
            metrics.observe_delay(delay);
        }
        delay
    }
}
