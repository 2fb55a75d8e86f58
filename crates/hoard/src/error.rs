//! Error types for the hoard engine.

use std::io;

use thiserror::Error;

use crate::key::{BlobKey, FileId, StoreId};

/// Everything that can go wrong inside the engine.
///
/// Nothing here is retried internally. Multi-step operations that fail part
/// way surface the first error and leave cleanup to the caller, except where
/// [`crate::FileHoard::put`] documents its own best-effort blob cleanup.
#[derive(Debug, Error)]
pub enum HoardError {
    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("blob {key} not found in store {store}")]
    BlobNotFound { store: StoreId, key: BlobKey },

    #[error("invalid blob key: expected 32 hex chars, got {0:?}")]
    InvalidKey(String),

    #[error("input cannot be rewound after hashing: {0}")]
    UnseekableInput(#[source] io::Error),

    #[error("input changed while chunking: hashed {expected_size} bytes, chunked {actual_size}")]
    InputChanged { expected_size: u64, actual_size: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store {store} failed: {source}")]
    Store {
        store: StoreId,
        #[source]
        source: io::Error,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("catalog connection mutex poisoned")]
    CatalogPoisoned,

    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HoardError {
    /// True for unknown files and missing blobs alike.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HoardError::FileNotFound(_) | HoardError::BlobNotFound { .. }
        )
    }

    pub(crate) fn store(store: &StoreId, source: io::Error) -> Self {
        HoardError::Store {
            store: store.clone(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type HoardResult<T> = std::result::Result<T, HoardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_covers_files_and_blobs() {
        assert!(HoardError::FileNotFound(FileId::new(3)).is_not_found());

        let blob = HoardError::BlobNotFound {
            store: StoreId::new("alpha"),
            key: BlobKey::generate(),
        };
        assert!(blob.is_not_found());

        assert!(!HoardError::Configuration("empty registry".into()).is_not_found());
        assert!(!HoardError::InvalidKey("abc".into()).is_not_found());
    }

    #[test]
    fn test_display_names_the_file() {
        let err = HoardError::FileNotFound(FileId::new(42));
        assert_eq!(err.to_string(), "file 42 not found");
    }
}
