//! Connection parameters.
//!
//! # Example
//!
//! ```
//! use telit_modem::{ConnectOptions, Protocol};
//!
//! let options = ConnectOptions::tcp("example.com", 80);
//! assert_eq!(options.protocol, Protocol::Tcp);
//! assert_eq!(options.resolve_local_port(), 80);
//!
//! let options = ConnectOptions::udp("10.0.0.1", 5683).with_local_port(40000);
//! assert_eq!(options.resolve_local_port(), 40000);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Lowest local port picked for UDP sockets without an explicit one.
const EPHEMERAL_PORT_MIN: u16 = 1024;

// ============================================================================
// Protocol
// ============================================================================

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream connection.
    #[default]
    Tcp,
    /// Datagram connection.
    Udp,
}

impl Protocol {
    /// Returns the `AT#SD` protocol code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Tcp => 0,
            Self::Udp => 1,
        }
    }
}

impl TryFrom<u8> for Protocol {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Tcp),
            1 => Ok(Self::Udp),
            other => Err(Error::invalid_argument(format!(
                "unknown transport protocol {other} (expected 0 = TCP or 1 = UDP)"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

// ============================================================================
// ReceiveMode
// ============================================================================

/// How the modem announces arrived data.
///
/// | Mode | URC | Follow-up |
/// |------|-----|-----------|
/// | `InlineHex` | `SRING: <id>,<len>,<hex>` | none |
/// | `Fetch` | `SRING: <id>,<len>` | `AT#SRECV=<id>,<n>` |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Payload pushed inline with the ring, hex encoded.
    #[default]
    InlineHex,
    /// Ring carries only the length; data is fetched on demand.
    Fetch,
}

impl ReceiveMode {
    /// Returns the `AT#SCFGEXT` `<srMode>` value.
    #[inline]
    #[must_use]
    pub const fn ring_mode(self) -> u8 {
        match self {
            Self::InlineHex => 2,
            Self::Fetch => 1,
        }
    }
}

// ============================================================================
// ConnectOptions
// ============================================================================

/// Parameters of one outgoing connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Remote host name or address.
    pub host: String,

    /// Remote port.
    pub port: u16,

    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,

    /// Local port; chosen automatically if `None`.
    #[serde(default)]
    pub local_port: Option<u16>,
}

impl ConnectOptions {
    /// Creates connection options.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            local_port: None,
        }
    }

    /// Creates TCP connection options.
    #[inline]
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Tcp)
    }

    /// Creates UDP connection options.
    #[inline]
    #[must_use]
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Udp)
    }

    /// Sets an explicit local port.
    #[inline]
    #[must_use]
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Checks the options before they reach the modem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the host is empty or contains
    /// quotes or control characters, or if a port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::invalid_argument("host is required"));
        }

        if self.host.chars().any(|c| c == '"' || c.is_control()) {
            return Err(Error::invalid_argument(format!(
                "host contains characters not allowed in a command line: {:?}",
                self.host
            )));
        }

        if self.port == 0 {
            return Err(Error::invalid_argument("port is required"));
        }

        if self.local_port == Some(0) {
            return Err(Error::invalid_argument("local port must be non-zero"));
        }

        Ok(())
    }

    /// Returns the local port sent with `AT#SD`.
    ///
    /// TCP reuses the remote port; UDP picks a random port in `1024..=65535`.
    #[must_use]
    pub fn resolve_local_port(&self) -> u16 {
        match (self.local_port, self.protocol) {
            (Some(port), _) => port,
            (None, Protocol::Tcp) => self.port,
            (None, Protocol::Udp) => random_ephemeral_port(),
        }
    }
}

/// Random port in `1024..=65535`.
fn random_ephemeral_port() -> u16 {
    let span = u128::from(u16::MAX - EPHEMERAL_PORT_MIN) + 1;
    let offset = Uuid::new_v4().as_u128() % span;
    // offset < span <= 64512, fits u16
    EPHEMERAL_PORT_MIN + offset as u16
}

// ============================================================================
// Tests
// ============================================================================
