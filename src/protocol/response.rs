//! Response patterns and matched capture groups.
//!
//! Every pattern is anchored at the start of the receive buffer: the
//! channel only ever matches what the modem sent *next*, never something
//! further down the stream.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use regex::bytes::Regex;

use crate::error::{Error, Result};

// ============================================================================
// Pattern
// ============================================================================

/// A response or notification pattern, anchored at buffer start.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern.
    ///
    /// The pattern is implicitly anchored; do not prefix it with `^`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`] if `source` is not a valid expression.
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let regex = Regex::new(&format!("^(?:{source})"))?;
        Ok(Self { source, regex })
    }

    /// Returns the pattern source as given to [`Pattern::new`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches at the start of `buf`.
    ///
    /// Returns the number of bytes consumed and the capture groups.
    #[must_use]
    pub fn match_prefix(&self, buf: &[u8]) -> Option<(usize, Captures)> {
        let caps = self.regex.captures(buf)?;
        let consumed = caps.get(0).map_or(0, |m| m.end());
        let groups = caps
            .iter()
            .map(|group| group.map(|m| m.as_bytes().to_vec()))
            .collect();
        Some((consumed, Captures { groups }))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

// ============================================================================
// Captures
// ============================================================================

/// Capture groups of a matched response or notification.
///
/// Group `0` is the whole match; numbered groups follow the pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<Vec<u8>>>,
}

impl Captures {
    /// Creates an empty capture set.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of groups including group `0`.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if nothing was captured.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Gets the raw bytes of a group.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Gets a group as UTF-8 text.
    #[inline]
    #[must_use]
    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Parses a group into `T`.
    #[must_use]
    pub fn parse<T: FromStr>(&self, index: usize) -> Option<T> {
        self.get_str(index).and_then(|s| s.trim().parse().ok())
    }

    /// Parses a required group, describing `field` in the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the group is missing or unparsable.
    pub fn require<T: FromStr>(&self, index: usize, field: &str) -> Result<T> {
        self.parse(index).ok_or_else(|| {
            Error::protocol(format!(
                "missing or invalid {field} in `{}`",
                self.get(0)
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default()
                    .trim_end()
            ))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
