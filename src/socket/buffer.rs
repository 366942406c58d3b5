//! Receive buffer between the notification path and the reader.
//!
//! Bytes are appended in arrival order and handed to the reader in one
//! piece per [`ReceiveBuffer::read`]. Nothing is ever dropped: the capacity
//! is a flow-control threshold, not a hard limit. In fetch mode the engine
//! stops pulling from the modem while [`ReceiveBuffer::room`] is zero; in
//! inline mode the modem cannot be refused and the buffer grows past it.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{trace, warn};

// ============================================================================
// ReceiveBuffer
// ============================================================================

/// Bounded, lossless byte queue with end-of-stream.
#[derive(Debug)]
pub struct ReceiveBuffer {
    state: Mutex<BufferState>,
    readable: Notify,
    capacity: usize,
}

/// Mutable part of the buffer.
#[derive(Debug, Default)]
struct BufferState {
    data: VecDeque<u8>,
    eof: bool,
    /// A reader is parked waiting for bytes.
    consumer_waiting: bool,
}

impl ReceiveBuffer {
    /// Creates an empty buffer with a flow-control threshold.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            readable: Notify::new(),
            capacity,
        }
    }

    /// Returns the flow-control threshold.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Returns `true` if no bytes are buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Returns how many bytes fit before the threshold.
    #[inline]
    #[must_use]
    pub fn room(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Returns `true` once end-of-stream was signaled.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().eof
    }

    /// Returns `true` while a reader is parked on an empty buffer.
    #[inline]
    #[must_use]
    pub fn is_consumer_waiting(&self) -> bool {
        self.state.lock().consumer_waiting
    }

    /// Appends bytes and wakes the reader.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let len = {
            let mut state = self.state.lock();
            state.data.extend(bytes);
            state.data.len()
        };

        if len > self.capacity {
            warn!(
                buffered = len,
                capacity = self.capacity,
                "Receive buffer over capacity"
            );
        } else {
            trace!(bytes = bytes.len(), buffered = len, "Buffered");
        }

        self.readable.notify_waiters();
    }

    /// Marks end-of-stream. Buffered bytes stay readable.
    pub fn close(&self) {
        self.state.lock().eof = true;
        self.readable.notify_waiters();
    }

    /// Takes everything buffered without waiting.
    #[must_use]
    pub fn try_read(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if state.data.is_empty() {
            None
        } else {
            Some(state.data.drain(..).collect())
        }
    }

    /// Waits for bytes and takes everything buffered.
    ///
    /// Returns `None` at end-of-stream, only after the buffer is drained.
    pub async fn read(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if !state.data.is_empty() {
                    state.consumer_waiting = false;
                    return Some(state.data.drain(..).collect());
                }
                if state.eof {
                    state.consumer_waiting = false;
                    return None;
                }
                state.consumer_waiting = true;
            }

            notified.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
