//! LocalChunkStore: the reference filesystem backend.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── store.toml          # store_id, kind = "local"
//! ├── ab/
//! │   └── cd/
//! │       └── abcd1234...  # full 32-char key as filename
//! └── 12/
//!     └── 34/
//!         └── 1234abcd...
//! ```
//!
//! Two levels of two-character shards keep directory sizes manageable when a
//! store holds millions of chunks.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HoardError, HoardResult};
use crate::key::{BlobKey, StoreId};
use crate::store::{ChunkReader, ChunkStore};

/// Name of the descriptor file written at the root of every local store.
pub const STORE_DESCRIPTOR: &str = "store.toml";

/// Contents of `store.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub store_id: StoreId,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "local".to_string()
}

/// Filesystem-backed chunk store.
#[derive(Debug, Clone)]
pub struct LocalChunkStore {
    id: StoreId,
    root: PathBuf,
}

impl LocalChunkStore {
    /// Create (or adopt) a store rooted at `root`.
    ///
    /// Writes `store.toml` if it is missing. If one already exists its id must
    /// match `id`.
    pub fn create(root: impl Into<PathBuf>, id: StoreId) -> HoardResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| HoardError::store(&id, e))?;

        let descriptor_path = root.join(STORE_DESCRIPTOR);
        if descriptor_path.exists() {
            let existing = read_descriptor(&descriptor_path)?;
            if existing.store_id != id {
                return Err(HoardError::Configuration(format!(
                    "{} belongs to store {}, not {}",
                    root.display(),
                    existing.store_id,
                    id
                )));
            }
        } else {
            let descriptor = StoreDescriptor {
                store_id: id.clone(),
                kind: default_kind(),
            };
            let text = toml::to_string_pretty(&descriptor)?;
            fs::write(&descriptor_path, text).map_err(|e| HoardError::store(&id, e))?;
        }

        debug!(store = %id, root = %root.display(), "local store ready");
        Ok(Self { id, root })
    }

    /// Open an existing store by reading its `store.toml`.
    pub fn open(root: impl Into<PathBuf>) -> HoardResult<Self> {
        let root = root.into();
        let descriptor = read_descriptor(&root.join(STORE_DESCRIPTOR))?;
        if descriptor.kind != "local" {
            return Err(HoardError::Configuration(format!(
                "unsupported store kind {:?} at {}",
                descriptor.kind,
                root.display()
            )));
        }
        Ok(Self {
            id: descriptor.store_id,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path where a blob would be stored.
    pub fn blob_path(&self, key: &BlobKey) -> PathBuf {
        let (first, second) = key.shards();
        self.root.join(first).join(second).join(key.as_str())
    }

    fn not_found_or(&self, key: &BlobKey, err: io::Error) -> HoardError {
        if err.kind() == io::ErrorKind::NotFound {
            HoardError::BlobNotFound {
                store: self.id.clone(),
                key: key.clone(),
            }
        } else {
            HoardError::store(&self.id, err)
        }
    }
}

fn read_descriptor(path: &Path) -> HoardResult<StoreDescriptor> {
    let text = fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|source| HoardError::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}

impl ChunkStore for LocalChunkStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn get(&self, key: &BlobKey) -> HoardResult<Box<dyn ChunkReader>> {
        let file = File::open(self.blob_path(key)).map_err(|e| self.not_found_or(key, e))?;
        Ok(Box::new(file))
    }

    fn put(&self, key: &BlobKey, data: &[u8]) -> HoardResult<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HoardError::store(&self.id, e))?;
        }
        fs::write(&path, data).map_err(|e| HoardError::store(&self.id, e))
    }

    fn delete(&self, key: &BlobKey) -> HoardResult<()> {
        fs::remove_file(self.blob_path(key)).map_err(|e| self.not_found_or(key, e))
    }

    fn exists(&self, key: &BlobKey) -> bool {
        self.blob_path(key).exists()
    }
}
