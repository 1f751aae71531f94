//! Content-addressed image keys.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a stored image.
///
/// Keys are derived from the payload's SHA-256 checksum (64 lowercase hex
/// chars), so identical uploads map to the same key and deduplicate
/// naturally. Assigned at upload time, immutable afterwards.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey(String);

impl ImageKey {
    /// Derive the key for a content hash.
    pub fn from_hash(hash: &ContentHash) -> Self {
        Self(hash.to_hex())
    }

    /// Parse a key from its string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(crate::Error::InvalidKey(format!(
                "expected 64 lowercase hex chars, got {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The object store key for this image's blob.
    ///
    /// Blobs are sharded by the first two hex chars to keep listings and
    /// filesystem directories shallow.
    pub fn object_key(&self) -> String {
        format!("images/{}/{}", &self.0[..2], self.0)
    }
}

impl fmt::Debug for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageKey({})", &self.0[..16])
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
