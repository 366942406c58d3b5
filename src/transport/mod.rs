//! Serial transport layer.
//!
//! This module owns the single AT command link to the modem.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Socket engine  │                              │  Telit modem    │
//! │  Modem facade   │        serial stream         │                 │
//! │                 │◄────────────────────────────►│  AT interpreter │
//! │  AtChannel      │   commands, responses, URCs  │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | [`CommandChannel`] contract shared by engine and facade |
//! | `at` | [`AtChannel`] event loop over an async byte stream |

// ============================================================================
// Submodules
// ============================================================================

/// Serial event loop implementing the command channel.
pub mod at;

/// Command channel contract.
pub mod channel;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use at::{AtChannel, DEFAULT_COMMAND_TIMEOUT};
pub use channel::{CommandChannel, NotificationHandler};
