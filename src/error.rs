//! Error types for the Telit modem driver.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use telit_modem::{ConnectOptions, Result};
//!
//! async fn example(modem: &Modem) -> Result<()> {
//!     let socket = modem.socket(None).await?;
//!     socket.connect(ConnectOptions::tcp("example.com", 80)).await?;
//!     socket.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Pool | [`Error::PoolExhausted`], [`Error::InvalidConnId`] |
//! | Socket | [`Error::AlreadyConnected`], [`Error::NotConnected`], [`Error::SocketBusy`] |
//! | Channel | [`Error::Channel`], [`Error::CommandTimeout`], [`Error::ChannelClosed`] |
//! | Protocol | [`Error::MalformedNotification`], [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Regex`] |
//!
//! A dropped link is not an error: it surfaces as end-of-stream
//! (`Socket::read` returning `Ok(None)`).

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::ConnId;
use crate::socket::SocketState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// No free connection identifier.
    ///
    /// Recoverable by closing and freeing another socket first.
    #[error("Connection pool exhausted: all {capacity} identifiers in use")]
    PoolExhausted {
        /// Number of identifiers managed by the pool.
        capacity: usize,
    },

    /// Connection identifier outside the pool's range.
    #[error("Invalid connection id: {value}")]
    InvalidConnId {
        /// The rejected value.
        value: u8,
    },

    // ========================================================================
    // Socket Errors
    // ========================================================================
    /// `connect` called on a socket that is not idle.
    #[error("Socket {conn_id} is not idle (state: {state})")]
    AlreadyConnected {
        /// Socket connection identifier.
        conn_id: ConnId,
        /// State the socket was in.
        state: SocketState,
    },

    /// Data operation on a socket that never connected.
    #[error("Socket {conn_id} is not connected")]
    NotConnected {
        /// Socket connection identifier.
        conn_id: ConnId,
    },

    /// Socket released to the pool before reaching `Closed`.
    #[error("Socket {conn_id} cannot be released in state {state}")]
    SocketBusy {
        /// Socket connection identifier.
        conn_id: ConnId,
        /// State the socket was in.
        state: SocketState,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The modem rejected a command.
    ///
    /// Returned for `ERROR`, `+CME ERROR` and `+CMS ERROR` final results.
    #[error("Command `{command}` failed: {message}")]
    Channel {
        /// Command line that failed.
        command: String,
        /// Final result text reported by the modem.
        message: String,
    },

    /// No response to a command within its timeout.
    #[error("Command `{command}` timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// Command line that timed out.
        command: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Command channel event loop has terminated.
    #[error("Command channel closed")]
    ChannelClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Unsolicited line with unexpected content.
    #[error("Malformed notification: {line}")]
    MalformedNotification {
        /// Offending line (lossy UTF-8).
        line: String,
    },

    /// Response did not have the expected shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when modem configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error on the serial stream.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid response pattern.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Self::ChannelClosed
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a pool exhausted error.
    #[inline]
    pub fn pool_exhausted(capacity: usize) -> Self {
        Self::PoolExhausted { capacity }
    }

    /// Creates an invalid connection id error.
    #[inline]
    pub fn invalid_conn_id(value: u8) -> Self {
        Self::InvalidConnId { value }
    }

    /// Creates an already connected error.
    #[inline]
    pub fn already_connected(conn_id: ConnId, state: SocketState) -> Self {
        Self::AlreadyConnected { conn_id, state }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(conn_id: ConnId) -> Self {
        Self::NotConnected { conn_id }
    }

    /// Creates a socket busy error.
    #[inline]
    pub fn socket_busy(conn_id: ConnId, state: SocketState) -> Self {
        Self::SocketBusy { conn_id, state }
    }

    /// Creates a channel error.
    #[inline]
    pub fn channel(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command: command.into(),
            timeout_ms,
        }
    }

    /// Creates a malformed notification error.
    #[inline]
    pub fn malformed_notification(line: impl Into<String>) -> Self {
        Self::MalformedNotification { line: line.into() }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. })
    }

    /// Returns `true` if the command/response exchange itself failed.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::Channel { .. } | Self::CommandTimeout { .. } | Self::ChannelClosed | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::Channel { .. } | Self::CommandTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
