//! Connection pool of modem sockets.
//!
//! The modem multiplexes a fixed number of sockets over one link. The pool
//! owns one slot per connection identifier and the [`Socket`] bound to it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ConnectionPool                │
//! │           (one modem link)              │
//! │  ┌─────────────────────────────────┐    │
//! │  │ ConnId=1 → Socket               │    │
//! │  │ ConnId=2 → (free)               │    │
//! │  │ ConnId=3 → Socket               │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnId;
use crate::transport::CommandChannel;

use super::engine::{RemoteSocketState, Socket, SocketSettings, SocketState};

// ============================================================================
// PoolInner
// ============================================================================

/// Shared pool state; sockets keep a weak reference for [`Socket::free`].
pub(crate) struct PoolInner {
    channel: Arc<dyn CommandChannel>,
    settings: SocketSettings,
    /// Slot `i` holds the socket bound to identifier `i + 1`.
    slots: RwLock<Vec<Option<Socket>>>,
}

impl PoolInner {
    /// Unbinds `socket`'s identifier.
    pub(crate) fn release(&self, socket: &Socket) -> Result<()> {
        let conn_id = socket.conn_id();

        let state = socket.state();
        if state != SocketState::Closed {
            return Err(Error::socket_busy(conn_id, state));
        }

        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(conn_id.index()) else {
            return Err(Error::invalid_conn_id(conn_id.get()));
        };

        match slot {
            Some(bound) if bound.same_as(socket) => {
                *slot = None;
                debug!(conn_id = %conn_id, "Released connection identifier");
            }
            _ => {
                debug!(conn_id = %conn_id, "Connection identifier already released");
            }
        }

        Ok(())
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Bounded table of sockets keyed by connection identifier.
///
/// Thread-safe; clones share the same table.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates a pool with `capacity` slots (clamped to `1..=6`).
    pub(crate) fn new(
        channel: Arc<dyn CommandChannel>,
        settings: SocketSettings,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.clamp(1, usize::from(ConnId::MAX));

        Self {
            inner: Arc::new(PoolInner {
                channel,
                settings,
                slots: RwLock::new(vec![None; capacity]),
            }),
        }
    }

    /// Weak handle for URC handlers owned by the channel.
    pub(crate) fn downgrade(&self) -> Weak<PoolInner> {
        Arc::downgrade(&self.inner)
    }

    /// Restores a pool from [`ConnectionPool::downgrade`].
    pub(crate) fn upgrade(weak: &Weak<PoolInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Returns the number of bound identifiers.
    #[inline]
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.inner.slots.read().iter().flatten().count()
    }

    /// Returns the socket bound to `conn_id`, if any.
    #[must_use]
    pub fn get(&self, conn_id: ConnId) -> Option<Socket> {
        self.inner
            .slots
            .read()
            .get(conn_id.index())
            .and_then(Clone::clone)
    }

    /// Returns every bound socket in identifier order.
    #[must_use]
    pub fn sockets(&self) -> Vec<Socket> {
        self.inner.slots.read().iter().flatten().cloned().collect()
    }

    /// Returns the socket for `conn_id`, or binds a new one.
    ///
    /// Without an identifier the lowest free slot is used. A newly bound
    /// socket gets its link configuration before this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if no slot is free
    /// - [`Error::InvalidConnId`] if `conn_id` is beyond the pool capacity
    pub async fn acquire(&self, conn_id: Option<ConnId>) -> Result<Socket> {
        let socket = {
            let mut slots = self.inner.slots.write();
            let capacity = slots.len();

            let index = match conn_id {
                Some(conn_id) => {
                    let index = conn_id.index();
                    match slots.get(index) {
                        None => return Err(Error::invalid_conn_id(conn_id.get())),
                        Some(Some(existing)) => return Ok(existing.clone()),
                        Some(None) => index,
                    }
                }
                None => slots
                    .iter()
                    .position(Option::is_none)
                    .ok_or_else(|| Error::pool_exhausted(capacity))?,
            };

            let conn_id = ConnId::all()
                .nth(index)
                .ok_or_else(|| Error::pool_exhausted(capacity))?;

            let socket = Socket::new(
                conn_id,
                Arc::clone(&self.inner.channel),
                self.inner.settings,
                Arc::downgrade(&self.inner),
            );
            slots[index] = Some(socket.clone());
            socket
        };

        debug!(conn_id = %socket.conn_id(), "Bound connection identifier");

        socket.configure().await;
        Ok(socket)
    }

    /// Unbinds a closed socket's identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketBusy`] unless the socket is `Closed`.
    pub fn release(&self, socket: &Socket) -> Result<()> {
        self.inner.release(socket)
    }

    /// Closes a socket, then releases its identifier.
    ///
    /// # Errors
    ///
    /// Returns the close failure; the identifier is released regardless.
    pub async fn free(&self, socket: &Socket) -> Result<()> {
        let closed = socket.close().await;
        self.release(socket)?;
        closed
    }

    /// Polls `AT#SS` for every connected socket.
    ///
    /// Sockets the modem reports closed take the link-dropped path.
    /// Returns the identifiers found closed.
    pub async fn check_connections(&self) -> Vec<ConnId> {
        let mut dropped = Vec::new();

        for socket in self.sockets().into_iter().filter(Socket::is_connected) {
            match socket.check_connection().await {
                Ok(RemoteSocketState::Closed) => dropped.push(socket.conn_id()),
                Ok(_) => {}
                Err(e) => {
                    warn!(conn_id = %socket.conn_id(), error = %e, "Liveness poll failed");
                }
            }
        }

        dropped
    }

    /// Closes every bound socket and releases all identifiers.
    ///
    /// Returns the close failures, if any.
    pub async fn close_all(&self) -> Vec<Error> {
        let sockets = self.sockets();
        let results = join_all(sockets.iter().map(|socket| self.free(socket))).await;
        results.into_iter().filter_map(Result::err).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
