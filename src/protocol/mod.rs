//! AT protocol message types.
//!
//! This module defines what travels over the serial link between the
//! driver (Rust) and the modem's command interpreter.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`Command`] | Driver → Modem | Command line, optional raw payload |
//! | Final result | Modem → Driver | `OK`, `ERROR`, `+CME ERROR: <e>` |
//! | Information response | Modem → Driver | `#SS: ...`, `#SRECV: ...` before `OK` |
//! | URC | Modem → Driver | `SRING`, `NO CARRIER`, `+CREG`, `+CMT` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Hex payload decoding |
//! | `command` | Command definitions |
//! | `notification` | URC patterns and parsing |
//! | `response` | Anchored patterns and capture groups |

// ============================================================================
// Submodules
// ============================================================================

/// Hex payload codec.
pub mod codec;

/// AT command definitions.
pub mod command;

/// Unsolicited result codes.
pub mod notification;

/// Response patterns and capture groups.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{decode_hex, encode_hex};
pub use command::{Command, Expect};
pub use notification::SocketNotification;
pub use response::{Captures, Pattern};
