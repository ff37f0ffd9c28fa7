//! Document format versions

use crate::error::UnsupportedVersionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `major.minor` format version
///
/// Readers accept any minor version of their own major and refuse newer
/// majors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatVersion {
    /// Incompatible layout changes
    pub major: u32,
    /// Additive changes
    pub minor: u32,
}

impl FormatVersion {
    /// Version written by this crate
    pub const CURRENT: Self = Self::new(1, 0);

    /// Construct a version
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Check that a reader at `self` can read `found`
    ///
    /// # Errors
    /// [`UnsupportedVersionError`] when `found.major` is newer
    pub fn accepts(self, found: Self) -> Result<(), UnsupportedVersionError> {
        if found.major > self.major {
            return Err(UnsupportedVersionError {
                found,
                supported: self,
            });
        }
        Ok(())
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Malformed version string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid format version `{0}`")]
pub struct VersionParseError(pub String);

impl FromStr for FormatVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| VersionParseError(s.to_string()))?;
        let parse = |part: &str| part.parse::<u32>().map_err(|_| VersionParseError(s.to_string()));
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

impl TryFrom<String> for FormatVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatVersion> for String {
    fn from(version: FormatVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let v: FormatVersion = "2.13".parse().unwrap();
        assert_eq!(v, FormatVersion::new(2, 13));
        assert_eq!(v.to_string(), "2.13");
        assert!("2".parse::<FormatVersion>().is_err());
        assert!("a.1".parse::<FormatVersion>().is_err());
    }

    #[test]
    fn minor_tolerant_major_strict() {
        let reader = FormatVersion::new(1, 0);
        assert!(reader.accepts(FormatVersion::new(1, 9)).is_ok());
        assert!(reader.accepts(FormatVersion::new(0, 4)).is_ok());
        let err = reader.accepts(FormatVersion::new(2, 0)).unwrap_err();
        assert_eq!(err.found, FormatVersion::new(2, 0));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&FormatVersion::new(1, 4)).unwrap();
        assert_eq!(json, "\"1.4\"");
        let back: FormatVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FormatVersion::new(1, 4));
    }
}
