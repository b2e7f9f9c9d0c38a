//! Stream versions and optimistic concurrency expectations.

use serde::{Deserialize, Serialize};

/// Position of the last event in a stream.
///
/// The n-th appended event introduces version `n`; a stream without events is
/// at [`AggregateVersion::NOT_CREATED`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateVersion(u64);

impl AggregateVersion {
    pub const NOT_CREATED: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn is_created(self) -> bool {
        self.0 > 0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for AggregateVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for AggregateVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Optimistic concurrency expectation for an append.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking (imports, migrations).
    Any,
    /// Require the stream to be at an exact version.
    Exact(AggregateVersion),
}

impl ExpectedVersion {
    pub fn matches(self, actual: AggregateVersion) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

impl From<AggregateVersion> for ExpectedVersion {
    fn from(value: AggregateVersion) -> Self {
        ExpectedVersion::Exact(value)
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}
