//! Builder pattern for modem sessions.
//!
//! Provides a fluent API over [`ModemConfig`] for opening [`Modem`] sessions.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use telit_modem::{Modem, ReceiveMode};
//!
//! # async fn example(serial: tokio::io::DuplexStream) -> telit_modem::Result<()> {
//! let modem = Modem::builder()
//!     .receive_mode(ReceiveMode::Fetch)
//!     .max_sockets(2)
//!     .command_timeout(Duration::from_secs(2))
//!     .open(serial)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::socket::ReceiveMode;
use crate::transport::CommandChannel;

use super::config::ModemConfig;
use super::core::Modem;

// ============================================================================
// ModemBuilder
// ============================================================================

/// Builder for configuring a [`Modem`] session.
///
/// Use [`Modem::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ModemBuilder {
    config: ModemConfig,
}

// ============================================================================
// ModemBuilder Implementation
// ============================================================================

impl ModemBuilder {
    /// Creates a builder with the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ModemConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how arrived socket data is announced.
    #[inline]
    #[must_use]
    pub fn receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.config.receive_mode = mode;
        self
    }

    /// Sets the number of connection identifiers (`1..=6`).
    #[inline]
    #[must_use]
    pub fn max_sockets(mut self, max_sockets: usize) -> Self {
        self.config.max_sockets = max_sockets;
        self
    }

    /// Sets the default AT command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Sets the `AT#SD` timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the per-socket receive buffer threshold.
    #[inline]
    #[must_use]
    pub fn recv_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.recv_buffer_capacity = capacity;
        self
    }

    /// Sets the maximum bytes per `AT#SSENDEXT`.
    #[inline]
    #[must_use]
    pub fn send_chunk_size(mut self, size: usize) -> Self {
        self.config.send_chunk_size = size;
        self
    }

    /// Returns the configuration built so far.
    #[inline]
    #[must_use]
    pub fn as_config(&self) -> &ModemConfig {
        &self.config
    }

    /// Opens a session over a serial stream.
    ///
    /// # Errors
    ///
    /// See [`Modem::open`].
    pub async fn open<S>(self, stream: S) -> Result<Modem>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Modem::open(stream, self.config).await
    }

    /// Opens a session over an existing command channel.
    ///
    /// # Errors
    ///
    /// See [`Modem::with_channel`].
    pub async fn with_channel(self, channel: Arc<dyn CommandChannel>) -> Result<Modem> {
        Modem::with_channel(channel, self.config).await
    }
}

// ============================================================================
// Tests
// ============================================================================
