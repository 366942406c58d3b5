//! Modem configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use telit_modem::{ModemConfig, ReceiveMode};
//!
//! let config = ModemConfig::new()
//!     .with_receive_mode(ReceiveMode::Fetch)
//!     .with_command_timeout(Duration::from_secs(2));
//! assert!(config.validate().is_ok());
//!
//! let config = ModemConfig::from_json(r#"{"max_sockets": 2}"#)?;
//! assert_eq!(config.max_sockets, 2);
//! # Ok::<(), telit_modem::Error>(())
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::ConnId;
use crate::protocol::command::MAX_SEND_LEN;
use crate::socket::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECV_BUFFER_CAPACITY, DEFAULT_SEND_CHUNK_SIZE, ReceiveMode,
    SocketSettings,
};
use crate::transport::DEFAULT_COMMAND_TIMEOUT;

// ============================================================================
// ModemConfig
// ============================================================================

/// Tunables of a [`Modem`](super::Modem) session.
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// How arrived data is announced.
    pub receive_mode: ReceiveMode,

    /// Number of connection identifiers to use (`1..=6`).
    pub max_sockets: usize,

    /// Default timeout for AT commands.
    #[serde(rename = "command_timeout_ms", with = "duration_ms")]
    pub command_timeout: Duration,

    /// Timeout for `AT#SD`.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Receive buffer threshold per socket.
    pub recv_buffer_capacity: usize,

    /// Maximum bytes per `AT#SSENDEXT` (`1..=1500`).
    pub send_chunk_size: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            receive_mode: ReceiveMode::default(),
            max_sockets: usize::from(ConnId::MAX),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            recv_buffer_capacity: DEFAULT_RECV_BUFFER_CAPACITY,
            send_chunk_size: DEFAULT_SEND_CHUNK_SIZE,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ModemConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] for malformed JSON
    /// - [`Error::Config`] for out-of-range values
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - see [`ModemConfig::from_json`]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Serializes the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ModemConfig {
    /// Sets the receive mode.
    #[inline]
    #[must_use]
    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.receive_mode = mode;
        self
    }

    /// Sets the number of connection identifiers.
    #[inline]
    #[must_use]
    pub fn with_max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = max_sockets;
        self
    }

    /// Sets the default command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the receive buffer threshold.
    #[inline]
    #[must_use]
    pub fn with_recv_buffer_capacity(mut self, capacity: usize) -> Self {
        self.recv_buffer_capacity = capacity;
        self
    }

    /// Sets the send chunk size.
    #[inline]
    #[must_use]
    pub fn with_send_chunk_size(mut self, size: usize) -> Self {
        self.send_chunk_size = size;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ModemConfig {
    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let max = usize::from(ConnId::MAX);
        if !(1..=max).contains(&self.max_sockets) {
            return Err(Error::config(format!(
                "max_sockets must be between 1 and {max}, got {}",
                self.max_sockets
            )));
        }

        if self.command_timeout.is_zero() {
            return Err(Error::config("command_timeout must be positive"));
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be positive"));
        }

        if self.recv_buffer_capacity == 0 {
            return Err(Error::config("recv_buffer_capacity must be positive"));
        }

        if !(1..=MAX_SEND_LEN).contains(&self.send_chunk_size) {
            return Err(Error::config(format!(
                "send_chunk_size must be between 1 and {MAX_SEND_LEN}, got {}",
                self.send_chunk_size
            )));
        }

        Ok(())
    }

    /// Per-socket part of the configuration.
    pub(crate) fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            receive_mode: self.receive_mode,
            connect_timeout: self.connect_timeout,
            recv_buffer_capacity: self.recv_buffer_capacity,
            send_chunk_size: self.send_chunk_size,
        }
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
