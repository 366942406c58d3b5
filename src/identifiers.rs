//! Type-safe identifiers for modem resources.
//!
//! Newtype wrappers prevent mixing a connection identifier with a PDP
//! context identifier or a raw integer at compile time.
//!
//! | Type | Range | Used by |
//! |------|-------|---------|
//! | [`ConnId`] | `1..=6` | `AT#SD`, `AT#SH`, `AT#SS`, `SRING`, `NO CARRIER` |
//! | [`ContextId`] | `1..=16` | `AT#SGACT`, `AT+CGDCONT` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnId
// ============================================================================

/// Connection identifier of a modem socket.
///
/// The modem multiplexes up to six sockets over its single data link,
/// numbered `1` through `6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ConnId(u8);

impl ConnId {
    /// Lowest connection identifier accepted by the modem.
    pub const MIN: u8 = 1;

    /// Highest connection identifier accepted by the modem.
    pub const MAX: u8 = 6;

    /// Creates a connection identifier.
    ///
    /// Returns `None` if `value` is outside `1..=6`.
    #[inline]
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Iterates every identifier in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }

    /// Zero-based slot index for table lookups.
    #[inline]
    #[must_use]
    pub(crate) const fn index(self) -> usize {
        (self.0 - Self::MIN) as usize
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for ConnId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("connection id {value} outside 1..=6"))
    }
}

impl From<ConnId> for u8 {
    fn from(id: ConnId) -> Self {
        id.0
    }
}

// ============================================================================
// ContextId
// ============================================================================

/// PDP context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u8);

impl ContextId {
    /// Creates a context identifier.
    ///
    /// Returns `None` if `value` is outside `1..=16`.
    #[inline]
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= 1 && value <= 16 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
