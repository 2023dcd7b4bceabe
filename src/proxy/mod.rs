//! The per-connection delay pipeline.

mod connection;
mod delay_queue;
mod pipe;

pub use connection::{
    dial_destination, ConnectionError, ConnectionHandle, ConnectionState, ConnectionSummary,
    ProxyConnection, ProxySettings, DEFAULT_QUEUE_SIZE,
};
pub use delay_queue::{DelayQueue, QueueError};
pub use pipe::{DelayGate, Direction, DirectionalPipe, PipeEnd, PipeReport};
