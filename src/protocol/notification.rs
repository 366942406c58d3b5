//! Unsolicited result codes (URCs).
//!
//! URCs share the serial link with command responses and may arrive between
//! any two exchanges. Each kind is registered with the command channel under
//! a name; per-socket registrations embed the connection identifier in both
//! the name and the pattern so one socket never sees another's traffic.
//!
//! | URC | Meaning |
//! |-----|---------|
//! | `SRING: <id>,<len>,<hex>` | data arrived, payload inline |
//! | `SRING: <id>,<len>` | data arrived, fetch with `AT#SRECV` |
//! | `NO CARRIER: <id>,<cause>` | connection `<id>` dropped |
//! | `NO CARRIER` | some connection dropped |
//! | `+CREG: <stat>` | network registration changed |
//! | `+CMT: "<alpha>",<len>` + PDU line | SMS delivered |

// ============================================================================
// Imports
// ============================================================================

use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::ConnId;
use crate::socket::ReceiveMode;

use super::codec::decode_hex;
use super::response::{Captures, Pattern};

// ============================================================================
// Registration Names
// ============================================================================

/// Registration name of a socket's data-available handler.
#[must_use]
pub fn socket_ring_name(conn_id: ConnId) -> String {
    format!("socketRing-{conn_id}")
}

/// Registration name of a socket's link-dropped handler.
#[must_use]
pub fn socket_close_name(conn_id: ConnId) -> String {
    format!("socketClose-{conn_id}")
}

/// Registration name of the channel-wide carrier loss handler.
pub const CARRIER_LOST: &str = "closedSocket";

/// Registration name of the network registration handler.
pub const NETWORK_REGISTRATION: &str = "networkRegistrationState";

/// Registration name of the incoming SMS handler.
pub const RECEIVED_SMS: &str = "receivedSMS";

// ============================================================================
// Patterns
// ============================================================================

/// Data-available pattern for one socket.
///
/// # Errors
///
/// Returns [`Error::Regex`] if the pattern fails to compile.
pub fn socket_ring_pattern(conn_id: ConnId, mode: ReceiveMode) -> Result<Pattern> {
    match mode {
        ReceiveMode::InlineHex => Pattern::new(format!(r"SRING: {conn_id},(\d+),([0-9A-Fa-f]*)\r\n")),
        ReceiveMode::Fetch => Pattern::new(format!(r"SRING: {conn_id},(\d+)\r\n")),
    }
}

/// Link-dropped pattern for one socket.
///
/// # Errors
///
/// Returns [`Error::Regex`] if the pattern fails to compile.
pub fn socket_close_pattern(conn_id: ConnId) -> Result<Pattern> {
    Pattern::new(format!(r"NO CARRIER: {conn_id},(\d+)\r\n"))
}

/// Untagged `NO CARRIER`.
///
/// # Errors
///
/// Returns [`Error::Regex`] if the pattern fails to compile.
pub fn carrier_lost_pattern() -> Result<Pattern> {
    Pattern::new(r"NO CARRIER\r\n")
}

/// Unsolicited `+CREG: <stat>` (one field, unlike the `AT+CREG?` response).
///
/// # Errors
///
/// Returns [`Error::Regex`] if the pattern fails to compile.
pub fn registration_pattern() -> Result<Pattern> {
    Pattern::new(r"\+CREG: (\d+)\r\n")
}

/// `+CMT` header plus PDU line.
///
/// # Errors
///
/// Returns [`Error::Regex`] if the pattern fails to compile.
pub fn sms_pattern() -> Result<Pattern> {
    Pattern::new(r#"\+CMT: "([^"\r\n]*)",(\d+)\r\n([0-9A-Fa-f]+)\r\n"#)
}

// ============================================================================
// SocketNotification
// ============================================================================

/// Parsed per-socket notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketNotification {
    /// Payload delivered inline with `SRING`.
    Data(Vec<u8>),
    /// `<len>` bytes are waiting in the modem.
    Available(usize),
    /// The connection dropped.
    Dropped {
        /// Modem-reported cause code.
        cause: u32,
    },
}

impl SocketNotification {
    /// Parses matched `SRING` groups.
    ///
    /// A length that disagrees with the decoded payload is logged, not
    /// rejected: the bytes themselves are authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] for missing groups or bad hex.
    pub fn from_ring(caps: &Captures, mode: ReceiveMode) -> Result<Self> {
        let len: usize = caps
            .parse(1)
            .ok_or_else(|| Error::malformed_notification(line_of(caps)))?;

        match mode {
            ReceiveMode::Fetch => Ok(Self::Available(len)),
            ReceiveMode::InlineHex => {
                let hex = caps
                    .get(2)
                    .ok_or_else(|| Error::malformed_notification(line_of(caps)))?;
                let data = decode_hex(hex)?;
                if data.len() != len {
                    warn!(
                        announced = len,
                        decoded = data.len(),
                        "SRING length does not match payload"
                    );
                }
                Ok(Self::Data(data))
            }
        }
    }

    /// Parses matched `NO CARRIER: <id>,<cause>` groups.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the cause is missing.
    pub fn from_close(caps: &Captures) -> Result<Self> {
        caps.parse(1)
            .map(|cause| Self::Dropped { cause })
            .ok_or_else(|| Error::malformed_notification(line_of(caps)))
    }
}

/// Whole matched line, for diagnostics.
fn line_of(caps: &Captures) -> String {
    caps.get(0)
        .map(|b| String::from_utf8_lossy(b).trim_end().to_string())
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
