//! Byte-store capability: opaque blob storage keyed by [`BlobKey`].
//!
//! The engine never looks inside a store. It asks for a readable handle,
//! writes whole chunk payloads, and deletes blobs, nothing more. Any number
//! of stores can be registered with one hoard, each identified by a
//! [`StoreId`].

use std::io::{Read, Seek};

use crate::error::HoardResult;
use crate::key::{BlobKey, StoreId};

pub mod local;
pub mod memory;

pub use local::LocalChunkStore;
pub use memory::MemoryChunkStore;

/// A readable, rewindable handle onto one chunk blob.
///
/// Retrieval only ever seeks a handle to its own start, its own end, or
/// forward to an absolute offset inside it.
pub trait ChunkReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ChunkReader for T {}

/// Trait for chunk storage backends.
///
/// Implementations must be shareable across threads; the engine holds them
/// behind `Arc` and calls them from concurrent `put`s.
pub trait ChunkStore: Send + Sync {
    /// The id this store is registered under.
    fn id(&self) -> &StoreId;

    /// Open a handle onto a blob.
    ///
    /// Fails with `BlobNotFound` if the key is absent.
    fn get(&self, key: &BlobKey) -> HoardResult<Box<dyn ChunkReader>>;

    /// Write a blob, replacing any existing blob under the same key.
    fn put(&self, key: &BlobKey, data: &[u8]) -> HoardResult<()>;

    /// Remove a blob.
    ///
    /// Fails with `BlobNotFound` if the key is absent.
    fn delete(&self, key: &BlobKey) -> HoardResult<()>;

    /// Check if a blob exists without opening it.
    fn exists(&self, key: &BlobKey) -> bool {
        self.get(key).is_ok()
    }
}
