//! Core type definitions for the transaction history log.

use std::fmt;

/// Sequence number of a transaction in the log.
///
/// Sequence numbers are monotonically increasing and shared across all
/// segment files; every fragment of one transaction carries the same
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqno(pub i64);

impl Seqno {
    /// Sentinel for "not yet known" (a freshly created first segment whose
    /// base sequence number has not been assigned).
    pub const UNKNOWN: Self = Self(-1);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seqno: i64) -> Self {
        Self(seqno)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the previous sequence number.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0 - 1)
    }

    /// Whether this is the [`Self::UNKNOWN`] sentinel.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seqno:{}", self.0)
    }
}

impl From<i64> for Seqno {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Opaque handle identifying one log client's cursor.
///
/// Issued by [`crate::Log::connect`] and passed back on every read. A client
/// holds at most one cursor; the table reclaims cursors that have been idle
/// past the configured timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Creates a client ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}
