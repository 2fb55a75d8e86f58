//! Identifiers: blob keys, store ids, and file ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HoardError;

/// Length of every blob key, in hex characters.
pub const BLOB_KEY_LEN: usize = 32;

/// Opaque name of one chunk blob inside a byte-store.
///
/// Always freshly generated from random data, never derived from content, so
/// two chunks with identical bytes still get distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validate an existing key string.
    pub fn parse(s: &str) -> Result<Self, HoardError> {
        if s.len() != BLOB_KEY_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HoardError::InvalidKey(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The two 2-char directory shards used by the local backend.
    pub fn shards(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlobKey {
    type Err = HoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobKey {
    type Error = HoardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}

/// Identifier of a registered byte-store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id, 32 hex chars.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Catalog-assigned handle to a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(i64);

impl FileId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_format() {
        let key = BlobKey::generate();
        assert_eq!(key.as_str().len(), BLOB_KEY_LEN);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        assert_ne!(BlobKey::generate(), BlobKey::generate());
    }

    #[test]
    fn test_shards() {
        let key = BlobKey::parse("abcdef01234567890123456789abcdef").unwrap();
        assert_eq!(key.shards(), ("ab", "cd"));
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        let err = BlobKey::parse("abc").unwrap_err();
        assert!(matches!(err, HoardError::InvalidKey(ref k) if k == "abc"));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(BlobKey::parse("../../../../etc/passwd/xxxxxxxxxx").is_err());
        assert!(BlobKey::parse("gggggggggggggggggggggggggggggggg").is_err());
    }

    #[test]
    fn test_key_serde_validates() {
        let key = BlobKey::generate();
        let json = serde_json::to_string(&key).unwrap();
        let restored: BlobKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, restored);

        let bad: Result<BlobKey, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_file_id_parse_and_display() {
        let id: FileId = "17".parse().unwrap();
        assert_eq!(id.get(), 17);
        assert_eq!(id.to_string(), "17");
        assert!("x".parse::<FileId>().is_err());
    }
}
