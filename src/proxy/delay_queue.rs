//! Bounded, order-preserving, time-gated queue of data chunks.
//!
//! Chunks leave in exactly the order they entered. A chunk is released
//! once its release time has passed; the consumer only ever waits on the
//! head, so a chunk with a short delay queued behind one with a long delay
//! is held until the long one leaves.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

/// Release time used when a delay does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Delay queue error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("delay queue closed")]
    Closed,
}

/// Bytes from one read together with the instant they may be forwarded.
#[derive(Debug)]
struct Chunk {
    data: Bytes,
    release_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<Chunk>,
    /// Hard close: waiters fail and queued chunks are dropped.
    closed: bool,
    /// No more input: queued chunks still drain.
    finished: bool,
}

/// Bounded FIFO whose head is released no earlier than its release time.
#[derive(Debug)]
pub struct DelayQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    /// Signalled when a slot frees up or the queue closes.
    space: Notify,
    /// Signalled when a chunk arrives or the queue closes or finishes.
    items: Notify,
}

impl DelayQueue {
    /// Create a queue holding at most `capacity` chunks (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            space: Notify::new(),
            items: Notify::new(),
        }
    }

    /// Append `data` to release `delay` from now.
    ///
    /// The release time is fixed when this is called, so time spent waiting
    /// for space counts toward the delay. Waits while the queue is full.
    pub async fn enqueue(&self, data: Bytes, delay: Duration) -> Result<(), QueueError> {
        let now = Instant::now();
        let release_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);

        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed || state.finished {
                    return Err(QueueError::Closed);
                }
                if state.chunks.len() < self.capacity {
                    state.chunks.push_back(Chunk { data, release_at });
                    drop(state);
                    self.items.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Remove and return the head once its release time has arrived.
    ///
    /// Fails with [`QueueError::Closed`] once the queue is closed, or once
    /// it is finished and empty.
    pub async fn dequeue(&self) -> Result<Bytes, QueueError> {
        loop {
            let notified = self.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let head = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                match state.chunks.front().map(|chunk| chunk.release_at) {
                    Some(release_at) if release_at <= Instant::now() => {
                        let chunk = state.chunks.pop_front().ok_or(QueueError::Closed)?;
                        drop(state);
                        self.space.notify_one();
                        return Ok(chunk.data);
                    }
                    Some(release_at) => Some(release_at),
                    None if state.finished => return Err(QueueError::Closed),
                    None => None,
                }
            };

            match head {
                Some(release_at) => {
                    // A wakeup here is either a close or a new tail item;
                    // both are handled by re-checking the state.
                    tokio::select! {
                        _ = sleep_until(release_at) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stop accepting chunks; already queued chunks still drain.
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.space.notify_waiters();
        self.items.notify_waiters();
    }

    /// Close the queue, discarding queued chunks and failing every waiter.
    ///
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.chunks.clear();
        }
        self.space.notify_waiters();
        self.items.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued chunks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
