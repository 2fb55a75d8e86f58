//! In-memory chunk store for tests and embedded use.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{HoardError, HoardResult};
use crate::key::{BlobKey, StoreId};
use crate::store::{ChunkReader, ChunkStore};

/// A chunk store that keeps every blob in a `HashMap`.
///
/// Handles returned by `get` are snapshots; deleting a blob does not affect a
/// handle that is already open.
///
/// A poisoned lock is recovered rather than reported: every mutation is a
/// single map insert or remove, so the map is never left half-updated.
#[derive(Debug)]
pub struct MemoryChunkStore {
    id: StoreId,
    blobs: RwLock<HashMap<BlobKey, Arc<[u8]>>>,
    fail_puts_after: Option<usize>,
    fail_deletes: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryChunkStore {
    pub fn new(id: impl Into<StoreId>) -> Self {
        Self {
            id: id.into(),
            blobs: RwLock::new(HashMap::new()),
            fail_puts_after: None,
            fail_deletes: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
        }
    }

    /// A store whose `put` starts failing once `n` writes have succeeded.
    ///
    /// Used to exercise partial-ingestion failure paths.
    pub fn failing_after(id: impl Into<StoreId>, n: usize) -> Self {
        Self {
            fail_puts_after: Some(n),
            ..Self::new(id)
        }
    }

    /// Make every `delete` fail with a store error until switched off.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.read_blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key currently held, in no particular order.
    pub fn keys(&self) -> Vec<BlobKey> {
        self.read_blobs().keys().cloned().collect()
    }

    fn read_blobs(&self) -> RwLockReadGuard<'_, HashMap<BlobKey, Arc<[u8]>>> {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_blobs(&self) -> RwLockWriteGuard<'_, HashMap<BlobKey, Arc<[u8]>>> {
        self.blobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkStore for MemoryChunkStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn get(&self, key: &BlobKey) -> HoardResult<Box<dyn ChunkReader>> {
        match self.read_blobs().get(key) {
            Some(data) => Ok(Box::new(Cursor::new(Arc::clone(data)))),
            None => Err(HoardError::BlobNotFound {
                store: self.id.clone(),
                key: key.clone(),
            }),
        }
    }

    fn put(&self, key: &BlobKey, data: &[u8]) -> HoardResult<()> {
        if let Some(limit) = self.fail_puts_after {
            if self.puts.load(Ordering::SeqCst) >= limit {
                return Err(HoardError::store(
                    &self.id,
                    io::Error::other("injected write failure"),
                ));
            }
        }

        self.write_blobs().insert(key.clone(), Arc::from(data));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &BlobKey) -> HoardResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(HoardError::store(
                &self.id,
                io::Error::other("injected delete failure"),
            ));
        }

        match self.write_blobs().remove(key) {
            Some(_) => Ok(()),
            None => Err(HoardError::BlobNotFound {
                store: self.id.clone(),
                key: key.clone(),
            }),
        }
    }

    fn exists(&self, key: &BlobKey) -> bool {
        self.read_blobs().contains_key(key)
    }
}
