//! Configuration for segment creation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmError};

/// Permission bits applied to a newly created segment.
///
/// Only the low nine bits (`0o777`) are meaningful to `shmget`; anything
/// above is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SegmentMode(u32);

impl SegmentMode {
    /// Read/write for the owner only.
    pub const OWNER_ONLY: Self = Self(0o600);

    /// Read/write for owner and group.
    pub const OWNER_GROUP: Self = Self(0o660);

    /// Read/write for owner, group and other.
    pub const WORLD: Self = Self(0o666);

    const MASK: u32 = 0o777;

    /// Create a mode from raw permission bits.
    pub fn new(bits: u32) -> Result<Self> {
        if bits & !Self::MASK != 0 {
            return Err(ShmError::InvalidMode(bits));
        }
        Ok(Self(bits))
    }

    /// The raw permission bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether the owner may both read and write.
    pub const fn owner_can_read_write(self) -> bool {
        self.0 & 0o600 == 0o600
    }
}

impl Default for SegmentMode {
    fn default() -> Self {
        Self::WORLD
    }
}

impl fmt::Display for SegmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05o}", self.0)
    }
}

impl TryFrom<u32> for SegmentMode {
    type Error = ShmError;

    fn try_from(bits: u32) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<SegmentMode> for u32 {
    fn from(mode: SegmentMode) -> Self {
        mode.0
    }
}

/// Error parsing a [`SegmentMode`] from text.
#[derive(Debug, thiserror::Error)]
pub enum ParseModeError {
    /// Not an octal number.
    #[error("invalid octal mode {0:?}")]
    NotOctal(String),

    /// Parsed, but outside `0o777`.
    #[error(transparent)]
    OutOfRange(#[from] ShmError),
}

impl FromStr for SegmentMode {
    type Err = ParseModeError;

    /// Accepts `600`, `0600` and `0o600`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0o")
            .or_else(|| trimmed.strip_prefix("0O"))
            .unwrap_or(trimmed);
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| ParseModeError::NotOctal(s.to_string()))?;
        Ok(Self::new(bits)?)
    }
}

/// Configuration for creating segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Permission bits for new segments
    pub mode: SegmentMode,

    /// Attach and zero the segment right after creating it
    pub zero_fill: bool,
}

impl SegmentConfig {
    /// Create a configuration with the default (world read/write) mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission bits for new segments
    #[must_use]
    pub const fn with_mode(mut self, mode: SegmentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable zero filling on creation
    #[must_use]
    pub const fn with_zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill = zero_fill;
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mode_range() {
        assert_eq!(SegmentMode::new(0o777).expect("max").bits(), 0o777);
        assert!(matches!(
            SegmentMode::new(0o1777),
            Err(ShmError::InvalidMode(0o1777))
        ));
    }

    #[test]
    fn test_mode_parse_forms() {
        for text in ["600", "0600", "0o600", " 0O600 "] {
            let mode: SegmentMode = text.parse().expect("parse");
            assert_eq!(mode, SegmentMode::OWNER_ONLY, "input {text:?}");
        }
        assert!(matches!(
            "rw-------".parse::<SegmentMode>(),
            Err(ParseModeError::NotOctal(_))
        ));
        assert!(matches!(
            "0o1000".parse::<SegmentMode>(),
            Err(ParseModeError::OutOfRange(_))
        ));
        assert!("999".parse::<SegmentMode>().is_err());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(SegmentMode::OWNER_ONLY.to_string(), "0o600");
        assert_eq!(SegmentMode::new(0o7).expect("mode").to_string(), "0o007");
    }

    #[test]
    fn test_owner_access() {
        assert!(SegmentMode::WORLD.owner_can_read_write());
        assert!(!SegmentMode::new(0o400).expect("mode").owner_can_read_write());
    }

    #[test]
    fn test_config_builder_and_serde() {
        let config = SegmentConfig::new()
            .with_mode(SegmentMode::OWNER_GROUP)
            .with_zero_fill(true);
        assert_eq!(config.mode.bits(), 0o660);
        assert!(config.zero_fill);

        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(json, r#"{"mode":432,"zero_fill":true}"#);

        let partial: SegmentConfig = serde_json::from_str(r#"{"zero_fill":true}"#).expect("partial");
        assert_eq!(partial.mode, SegmentMode::WORLD);

        assert!(serde_json::from_str::<SegmentConfig>(r#"{"mode":4096}"#).is_err());
    }
}
