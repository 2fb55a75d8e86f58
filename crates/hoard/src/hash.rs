//! ContentHash: whole-file fingerprint, BLAKE3 truncated to 128 bits (32 hex chars).
//!
//! Only used for whole-file dedup lookups keyed by `(size, hash)`. Chunks are
//! never addressed by content.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters in a [`ContentHash`].
pub const HASH_HEX_LEN: usize = 32;

/// A content hash - 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

/// Errors that can occur when parsing content hashes.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hash length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash a complete buffer.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create from an existing hash string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental hasher with a running byte count.
///
/// Ingestion feeds it one bounded read at a time so nothing beyond a single
/// buffer is held in memory.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(&self) -> ContentHash {
        let digest = self.inner.finalize();
        ContentHash(hex::encode(&digest.as_bytes()[..16])) // 128 bits
    }
}
