//! Packet data and network registration types.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// PdpType
// ============================================================================

/// PDP context type for `AT+CGDCONT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PdpType {
    /// IPv4.
    #[default]
    #[serde(rename = "IP")]
    Ip,
    /// IPv6.
    #[serde(rename = "IPV6")]
    Ipv6,
    /// Dual stack.
    #[serde(rename = "IPV4V6")]
    Ipv4v6,
}

impl PdpType {
    /// Returns the `AT+CGDCONT` type string.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::Ipv6 => "IPV6",
            Self::Ipv4v6 => "IPV4V6",
        }
    }
}

impl fmt::Display for PdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdpType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IP" => Ok(Self::Ip),
            "IPV6" => Ok(Self::Ipv6),
            "IPV4V6" => Ok(Self::Ipv4v6),
            other => Err(Error::invalid_argument(format!(
                "invalid PDP type {other:?}, expected IP, IPV6 or IPV4V6"
            ))),
        }
    }
}

// ============================================================================
// RegistrationState
// ============================================================================

/// Network registration state (`<stat>` of `+CREG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    /// `0`: not registered, not searching.
    NotRegistered,
    /// `1`: registered, home network.
    RegisteredHome,
    /// `2`: not registered, searching.
    Searching,
    /// `3`: registration denied.
    Denied,
    /// `4`: unknown.
    Unknown,
    /// `5`: registered, roaming.
    RegisteredRoaming,
}

impl RegistrationState {
    /// Returns `true` when attached to a home or roaming network.
    #[inline]
    #[must_use]
    pub fn is_registered(self) -> bool {
        matches!(self, Self::RegisteredHome | Self::RegisteredRoaming)
    }
}

impl TryFrom<u8> for RegistrationState {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::NotRegistered,
            1 => Self::RegisteredHome,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::Unknown,
            5 => Self::RegisteredRoaming,
            other => {
                return Err(Error::protocol(format!(
                    "unknown registration state {other}"
                )));
            }
        })
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotRegistered => "not registered",
            Self::RegisteredHome => "registered (home)",
            Self::Searching => "searching",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
            Self::RegisteredRoaming => "registered (roaming)",
        };
        f.write_str(text)
    }
}

// ============================================================================
// NetworkRegistration
// ============================================================================

/// Answer to `AT+CREG?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRegistration {
    /// Unsolicited reporting mode (`<n>`).
    pub reporting: u8,
    /// Registration state (`<stat>`).
    pub state: RegistrationState,
}

// ============================================================================
// Tests
// ============================================================================
