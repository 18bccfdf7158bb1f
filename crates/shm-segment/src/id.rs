//! Host-assigned segment identifiers.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a System V shared memory segment.
///
/// The kernel hands out non-negative `int` values and signals failure with
/// `-1`, so a `SegmentId` always holds a value `>= 0`. Any process that
/// learns the value (over a pipe, a socket, a command line) can attach the
/// segment it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct SegmentId(i32);

impl SegmentId {
    /// Wrap a raw identifier, rejecting the negative failure sentinel range.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 { None } else { Some(Self(raw)) }
    }

    /// The raw identifier as passed to `shmat`/`shmctl`.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when parsing or converting a [`SegmentId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentIdError {
    /// Not a decimal integer.
    #[error("invalid segment id: {0}")]
    Parse(#[from] ParseIntError),

    /// Negative values are the host's failure sentinel.
    #[error("segment id must be non-negative, got {0}")]
    Negative(i32),
}

impl TryFrom<i32> for SegmentId {
    type Error = SegmentIdError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(SegmentIdError::Negative(raw))
    }
}

impl From<SegmentId> for i32 {
    fn from(id: SegmentId) -> Self {
        id.0
    }
}

impl FromStr for SegmentId {
    type Err = SegmentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i32 = s.trim().parse()?;
        Self::try_from(raw)
    }
}
