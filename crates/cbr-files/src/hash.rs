//! Content hashes for pooled blobs
//!
//! Every blob in a [`ContentPool`](crate::ContentPool) is keyed by a
//! [`ContentHash`]. The hash is computed once, when bytes first enter a site
//! pool; copies between pools carry the hash along and never recompute it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// 32-byte Blake3 digest identifying a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash a byte slice
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 16 hex characters, for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Relative blob location inside a pool: `ab/cd/<full hex>`
    ///
    /// Two levels of fan-out keep directory sizes bounded for large pools.
    #[must_use]
    pub fn fanout_path(&self) -> String {
        let full = hex::encode(self.0);
        format!("{}/{}/{}", &full[..2], &full[2..4], full)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Failure to parse a hex-encoded content hash
#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    /// Not valid hex
    #[error("invalid hex in content hash: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Decoded to the wrong number of bytes
    #[error("content hash must be 32 bytes, got {0}")]
    Length(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic() {
        assert_eq!(ContentHash::compute(b"lesson"), ContentHash::compute(b"lesson"));
        assert_ne!(ContentHash::compute(b"lesson"), ContentHash::compute(b"lesson2"));
    }

    #[test]
    fn hex_roundtrip() {
        let hash = ContentHash::compute(b"syllabus.pdf");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn rejects_short_hex() {
        let err = "abc123".parse::<ContentHash>().unwrap_err();
        assert!(matches!(err, HashParseError::Length(3)));
    }

    #[test]
    fn fanout_path_prefixes() {
        let hash = ContentHash::compute(b"x");
        let path = hash.fanout_path();
        let hex = hash.to_string();
        assert_eq!(path, format!("{}/{}/{}", &hex[..2], &hex[2..4], hex));
    }

    #[test]
    fn serde_uses_hex_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
