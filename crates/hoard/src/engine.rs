//! The hoard engine: ingestion, retrieval, and deletion over a catalog and a
//! weighted set of chunk stores.
//!
//! # Consistency
//!
//! - `put` commits the file row and all chunk rows in one catalog transaction
//!   after every chunk blob is written. On failure it deletes the blobs it
//!   wrote (best-effort). A crash between blob writes and the commit can leave
//!   unreferenced blobs in stores, never catalog rows.
//! - The dedup check and the insert are not serialized across callers. Two
//!   concurrent `put`s of identical content may both store it.
//! - `delete` removes blobs first, then rows. An interrupted delete leaves
//!   rows pointing at some missing blobs; calling it again finishes the job.
//! - A reader opened before a concurrent `delete` may fail mid-stream.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, ChunkLocation, FileRecord};
use crate::config::{HoardConfig, HOARD_CONFIG_FILE};
use crate::error::{HoardError, HoardResult};
use crate::hash::{ContentHash, ContentHasher};
use crate::key::{BlobKey, FileId, StoreId};
use crate::placement::WeightedPlacement;
use crate::reader::HoardReader;
use crate::store::ChunkStore;

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Read size for the hashing pass, independent of chunk size.
const HASH_READ_SIZE: usize = 64 * 1024;

/// Engine settings read once at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoardSettings {
    pub chunk_size: usize,
    pub allow_duplicates: bool,
}

impl HoardSettings {
    /// Reject settings no engine can run with.
    pub fn validate(&self) -> HoardResult<()> {
        if self.chunk_size == 0 {
            return Err(HoardError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HoardSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            allow_duplicates: false,
        }
    }
}

/// A chunk store together with its placement weight.
#[derive(Clone)]
pub struct RegisteredStore {
    pub store: Arc<dyn ChunkStore>,
    pub weight: u32,
}

impl RegisteredStore {
    pub fn new(store: Arc<dyn ChunkStore>, weight: u32) -> Self {
        Self { store, weight }
    }
}

/// The operations a file hoard offers.
pub trait FileHoard {
    /// Ingest a stream, returning the id of the stored (or deduplicated) file.
    ///
    /// The stream is read twice: once to hash it, once to chunk it.
    fn put<R: Read + Seek>(&self, input: R, name: Option<&str>) -> HoardResult<FileId>;

    /// Open a file for reading.
    fn open(&self, file_id: FileId) -> HoardResult<HoardReader>;

    /// Remove a file's blobs and catalog rows.
    fn delete(&self, file_id: FileId) -> HoardResult<()>;

    /// Look up a file's metadata.
    fn stat(&self, file_id: FileId) -> HoardResult<FileRecord>;
}

/// Chunked, deduplicating file store.
pub struct Hoard {
    catalog: Catalog,
    stores: HashMap<StoreId, Arc<dyn ChunkStore>>,
    placement: WeightedPlacement,
    settings: HoardSettings,
}

impl Hoard {
    /// Build an engine from already-resolved parts.
    ///
    /// Fails with `Configuration` if no store can receive chunks or the chunk
    /// size is zero.
    pub fn new(
        catalog: Catalog,
        registry: Vec<RegisteredStore>,
        settings: HoardSettings,
    ) -> HoardResult<Self> {
        settings.validate()?;

        let weights = registry.iter().map(|r| (r.store.id().clone(), r.weight));
        let placement = WeightedPlacement::new(weights)?;
        let stores = registry
            .into_iter()
            .map(|r| (r.store.id().clone(), r.store))
            .collect();

        Ok(Self {
            catalog,
            stores,
            placement,
            settings,
        })
    }

    /// Create a new hoard in `dir` and persist its configuration.
    ///
    /// A config without stores gets one local store under `stores/`. The
    /// config is validated before anything is written, so a rejected config
    /// leaves no directories, stores or catalog behind.
    pub fn create(dir: impl AsRef<Path>, mut config: HoardConfig) -> HoardResult<Self> {
        let dir = dir.as_ref();
        let config_path = dir.join(HOARD_CONFIG_FILE);
        if config_path.exists() {
            return Err(HoardError::Configuration(format!(
                "{} already exists",
                config_path.display()
            )));
        }

        if config.stores.is_empty() {
            config = config.with_local_store(default_store_path(), 1);
        }
        config.validate()?;

        fs::create_dir_all(dir)?;

        let registry = config
            .stores
            .iter()
            .map(|s| -> HoardResult<RegisteredStore> {
                Ok(RegisteredStore::new(s.create(dir)?, s.weight))
            })
            .collect::<HoardResult<Vec<_>>>()?;
        let catalog = config.catalog.connect(dir)?;
        let hoard = Self::new(catalog, registry, config.settings())?;

        config.save(&config_path)?;
        info!(
            hoard = %config.hoard.hoard_id,
            dir = %dir.display(),
            stores = config.stores.len(),
            "created hoard"
        );
        Ok(hoard)
    }

    /// Open an existing hoard from `dir/hoard.toml`.
    pub fn open(dir: impl AsRef<Path>) -> HoardResult<Self> {
        let dir = dir.as_ref();
        let mut config = HoardConfig::load(&dir.join(HOARD_CONFIG_FILE))?;
        for var in config.apply_env_overrides() {
            debug!(var, "config overridden from environment");
        }

        let registry = config
            .stores
            .iter()
            .map(|s| -> HoardResult<RegisteredStore> {
                Ok(RegisteredStore::new(s.open(dir)?, s.weight))
            })
            .collect::<HoardResult<Vec<_>>>()?;
        let catalog = config.catalog.connect(dir)?;

        debug!(hoard = %config.hoard.hoard_id, dir = %dir.display(), "opened hoard");
        Self::new(catalog, registry, config.settings())
    }

    pub fn settings(&self) -> HoardSettings {
        self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Registered store ids in placement order.
    pub fn store_ids(&self) -> &[StoreId] {
        self.placement.stores()
    }

    /// Number of stored files.
    pub fn len(&self) -> HoardResult<u64> {
        self.catalog.count_files()
    }

    pub fn is_empty(&self) -> HoardResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every stored file, oldest first.
    pub fn list(&self) -> HoardResult<Vec<FileRecord>> {
        self.catalog.list_files()
    }

    /// Ingest an in-memory buffer.
    pub fn put_bytes(&self, data: &[u8], name: Option<&str>) -> HoardResult<FileId> {
        self.put(Cursor::new(data), name)
    }

    /// Ingest a file from disk. The stored name defaults to the file name.
    pub fn put_path(&self, path: impl AsRef<Path>, name: Option<&str>) -> HoardResult<FileId> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let default_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.put(file, name.or(default_name.as_deref()))
    }

    fn store(&self, id: &StoreId) -> HoardResult<&Arc<dyn ChunkStore>> {
        self.stores.get(id).ok_or_else(|| {
            HoardError::Configuration(format!("chunk store {id} is not registered"))
        })
    }

    /// Split `input` into chunks, writing each to a placed store.
    ///
    /// Every chunk written is pushed onto `written` before anything else can
    /// fail, so the caller can discard it.
    fn write_chunks<R: Read>(
        &self,
        input: &mut R,
        expected_size: u64,
        expected_hash: &ContentHash,
        written: &mut Vec<ChunkLocation>,
    ) -> HoardResult<()> {
        let chunk_size = self.settings.chunk_size;
        let mut hasher = ContentHasher::new();
        let mut buf = Vec::with_capacity(chunk_size);

        loop {
            buf.clear();
            input.by_ref().take(chunk_size as u64).read_to_end(&mut buf)?;
            // An empty input still gets one (empty) chunk.
            if buf.is_empty() && !written.is_empty() {
                break;
            }
            hasher.update(&buf);

            let ordering = written.len() as u32 + 1;
            let key = BlobKey::generate();
            let store_id = self.placement.choose();
            self.store(store_id)?.put(&key, &buf)?;
            debug!(ordering, store = %store_id, key = %key, bytes = buf.len(), "wrote chunk");

            written.push(ChunkLocation {
                ordering,
                key,
                store: store_id.clone(),
            });

            if buf.len() < chunk_size {
                break;
            }
        }

        if hasher.len() != expected_size || hasher.finalize() != *expected_hash {
            return Err(HoardError::InputChanged {
                expected_size,
                actual_size: hasher.len(),
            });
        }
        Ok(())
    }

    /// Best-effort removal of blobs written by an aborted `put`.
    fn discard(&self, written: &[ChunkLocation]) {
        for chunk in written {
            let result = self
                .store(&chunk.store)
                .and_then(|store| store.delete(&chunk.key));
            if let Err(e) = result {
                warn!(
                    store = %chunk.store,
                    key = %chunk.key,
                    error = %e,
                    "failed to discard chunk of aborted put"
                );
            }
        }
    }
}

impl FileHoard for Hoard {
    #[instrument(level = "debug", skip(self, input))]
    fn put<R: Read + Seek>(&self, mut input: R, name: Option<&str>) -> HoardResult<FileId> {
        let (size, hash) = hash_stream(&mut input)?;

        if !self.settings.allow_duplicates {
            if let Some(existing) = self.catalog.find_duplicate(size, &hash)? {
                info!(file = %existing, size, %hash, "duplicate content, reusing stored file");
                return Ok(existing);
            }
        }

        input
            .seek(SeekFrom::Start(0))
            .map_err(HoardError::UnseekableInput)?;

        let mut written = Vec::new();
        let result = self
            .write_chunks(&mut input, size, &hash, &mut written)
            .and_then(|()| self.catalog.record_file(name, size, &hash, &written));

        match result {
            Ok(file_id) => {
                info!(file = %file_id, size, chunks = written.len(), %hash, "stored file");
                Ok(file_id)
            }
            Err(e) => {
                warn!(error = %e, chunks = written.len(), "put failed, discarding written chunks");
                self.discard(&written);
                Err(e)
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn open(&self, file_id: FileId) -> HoardResult<HoardReader> {
        let meta = self.catalog.get_file_meta(file_id)?;
        let chunks = self.catalog.list_chunks(file_id)?;
        if chunks.is_empty() {
            return Err(HoardError::FileNotFound(file_id));
        }

        let handles = chunks
            .iter()
            .map(|chunk| self.store(&chunk.store)?.get(&chunk.key))
            .collect::<HoardResult<Vec<_>>>()?;
        Ok(HoardReader::new(file_id, meta.size, handles))
    }

    #[instrument(level = "debug", skip(self))]
    fn delete(&self, file_id: FileId) -> HoardResult<()> {
        let chunks = self.catalog.list_chunks(file_id)?;
        for chunk in &chunks {
            match self.store(&chunk.store)?.delete(&chunk.key) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(store = %chunk.store, key = %chunk.key, "chunk blob already gone");
                }
                Err(e) => return Err(e),
            }
        }

        if !self.catalog.delete_file(file_id)? {
            return Err(HoardError::FileNotFound(file_id));
        }
        info!(file = %file_id, chunks = chunks.len(), "deleted file");
        Ok(())
    }

    fn stat(&self, file_id: FileId) -> HoardResult<FileRecord> {
        self.catalog.get_file_meta(file_id)
    }
}

/// First ingestion pass: byte count and digest in bounded reads.
fn hash_stream<R: Read>(input: &mut R) -> HoardResult<(u64, ContentHash)> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_READ_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }
    Ok((hasher.len(), hasher.finalize()))
}

fn default_store_path() -> PathBuf {
    PathBuf::from("stores").join(StoreId::generate().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;
    use std::io::{self, Read};

    fn memory_hoard(chunk_size: usize, allow_duplicates: bool) -> (Hoard, Arc<MemoryChunkStore>) {
        let store = Arc::new(MemoryChunkStore::new("mem"));
        let hoard = Hoard::new(
            Catalog::in_memory().unwrap(),
            vec![RegisteredStore::new(store.clone(), 1)],
            HoardSettings {
                chunk_size,
                allow_duplicates,
            },
        )
        .unwrap();
        (hoard, store)
    }

    fn read_all(hoard: &Hoard, id: FileId) -> Vec<u8> {
        let mut out = Vec::new();
        hoard.open(id).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_letters_example() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"ABCDEFGHIJ", Some("letters"))?;

        let meta = hoard.stat(id)?;
        assert_eq!(meta.size, 10);
        assert_eq!(meta.name.as_deref(), Some("letters"));

        let chunks = hoard.catalog().list_chunks(id)?;
        let orderings: Vec<u32> = chunks.iter().map(|c| c.ordering).collect();
        assert_eq!(orderings, [1, 2, 3]);
        assert_eq!(store.len(), 3);

        let mut sizes = Vec::new();
        for chunk in &chunks {
            let mut data = Vec::new();
            store.get(&chunk.key)?.read_to_end(&mut data)?;
            sizes.push(data.len());
        }
        assert_eq!(sizes, [4, 4, 2]);

        let mut reader = hoard.open(id)?;
        let mut all = Vec::new();
        reader.read_to_end(&mut all)?;
        assert_eq!(all, b"ABCDEFGHIJ");

        reader.seek(SeekFrom::Start(6))?;
        let mut two = [0u8; 2];
        reader.read_exact(&mut two)?;
        assert_eq!(&two, b"GH");
        Ok(())
    }

    #[test]
    fn test_empty_input_stores_one_empty_chunk() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"", None)?;

        assert_eq!(hoard.stat(id)?.size, 0);
        assert_eq!(hoard.catalog().list_chunks(id)?.len(), 1);
        assert_eq!(store.len(), 1);
        assert!(read_all(&hoard, id).is_empty());
        Ok(())
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() -> HoardResult<()> {
        let (hoard, _store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"ABCDEFGH", None)?;

        assert_eq!(hoard.catalog().list_chunks(id)?.len(), 2);
        assert_eq!(read_all(&hoard, id), b"ABCDEFGH");
        Ok(())
    }

    #[test]
    fn test_dedup_returns_same_id() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let first = hoard.put_bytes(b"same bytes", Some("a"))?;
        let second = hoard.put_bytes(b"same bytes", Some("b"))?;

        assert_eq!(first, second);
        assert_eq!(hoard.len()?, 1);
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[test]
    fn test_duplicates_allowed() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, true);
        let first = hoard.put_bytes(b"same bytes", None)?;
        let second = hoard.put_bytes(b"same bytes", None)?;

        assert_ne!(first, second);
        assert_eq!(hoard.len()?, 2);
        assert_eq!(store.len(), 6);
        assert_eq!(read_all(&hoard, first), b"same bytes");
        assert_eq!(read_all(&hoard, second), b"same bytes");
        Ok(())
    }

    #[test]
    fn test_delete_removes_blobs_and_rows() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"ABCDEFGHIJ", None)?;
        let keys: Vec<BlobKey> = hoard
            .catalog()
            .list_chunks(id)?
            .into_iter()
            .map(|c| c.key)
            .collect();

        hoard.delete(id)?;

        assert!(matches!(hoard.open(id), Err(HoardError::FileNotFound(_))));
        assert!(keys.iter().all(|k| !store.exists(k)));
        assert!(store.is_empty());
        assert!(matches!(hoard.delete(id), Err(HoardError::FileNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_delete_tolerates_missing_blobs() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"ABCDEFGHIJ", None)?;

        // Simulate an earlier, interrupted delete.
        let first = hoard.catalog().list_chunks(id)?.remove(0);
        store.delete(&first.key)?;

        hoard.delete(id)?;
        assert!(store.is_empty());
        assert_eq!(hoard.len()?, 0);
        Ok(())
    }

    #[test]
    fn test_delete_store_error_keeps_rows() -> HoardResult<()> {
        let (hoard, store) = memory_hoard(4, false);
        let id = hoard.put_bytes(b"ABCDEFGHIJ", Some("kept"))?;
        let meta = hoard.stat(id)?;
        let chunks = hoard.catalog().list_chunks(id)?;

        store.set_fail_deletes(true);
        let err = hoard.delete(id).unwrap_err();
        assert!(matches!(err, HoardError::Store { .. }));
        assert_eq!(hoard.stat(id)?, meta);
        assert_eq!(hoard.catalog().list_chunks(id)?, chunks);
        assert_eq!(store.len(), 3);
        assert_eq!(read_all(&hoard, id), b"ABCDEFGHIJ");

        store.set_fail_deletes(false);
        hoard.delete(id)?;
        assert!(store.is_empty());
        assert!(matches!(hoard.stat(id), Err(HoardError::FileNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_open_unknown_file() {
        let (hoard, _store) = memory_hoard(4, false);
        let err = hoard.open(FileId::new(12)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_file_without_chunks_is_not_found() -> HoardResult<()> {
        let (hoard, _store) = memory_hoard(4, false);
        let id = hoard
            .catalog()
            .insert_file(None, 0, &ContentHash::from_data(b""))?;

        assert!(matches!(hoard.open(id), Err(HoardError::FileNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_store_failure_rolls_back() {
        let store = Arc::new(MemoryChunkStore::failing_after("flaky", 2));
        let hoard = Hoard::new(
            Catalog::in_memory().unwrap(),
            vec![RegisteredStore::new(store.clone(), 1)],
            HoardSettings {
                chunk_size: 4,
                allow_duplicates: false,
            },
        )
        .unwrap();

        let err = hoard.put_bytes(b"ABCDEFGHIJ", None).unwrap_err();
        assert!(matches!(err, HoardError::Store { .. }));
        assert_eq!(hoard.len().unwrap(), 0);
        assert!(store.is_empty());
    }

    /// A reader that cannot be rewound, like a pipe.
    struct Pipe(Cursor<Vec<u8>>);

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for Pipe {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
        }
    }

    #[test]
    fn test_unseekable_input() {
        let (hoard, store) = memory_hoard(4, false);
        let err = hoard
            .put(Pipe(Cursor::new(b"streamed".to_vec())), None)
            .unwrap_err();

        assert!(matches!(err, HoardError::UnseekableInput(_)));
        assert!(store.is_empty());
        assert_eq!(hoard.len().unwrap(), 0);
    }

    /// Yields different bytes on the second pass.
    struct Shifty {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for Shifty {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for Shifty {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner = Cursor::new(b"something else entirely".to_vec());
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_input_changed_between_passes() {
        let (hoard, store) = memory_hoard(4, false);
        let input = Shifty {
            inner: Cursor::new(b"original".to_vec()),
        };

        let err = hoard.put(input, None).unwrap_err();
        assert!(matches!(err, HoardError::InputChanged { expected_size: 8, .. }));
        assert!(store.is_empty());
        assert_eq!(hoard.len().unwrap(), 0);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = Hoard::new(
            Catalog::in_memory().unwrap(),
            vec![RegisteredStore::new(Arc::new(MemoryChunkStore::new("m")), 1)],
            HoardSettings {
                chunk_size: 0,
                allow_duplicates: false,
            },
        );
        assert!(matches!(result, Err(HoardError::Configuration(_))));
    }

    #[test]
    fn test_settings_validate() {
        assert!(HoardSettings::default().validate().is_ok());
        let zero = HoardSettings {
            chunk_size: 0,
            allow_duplicates: true,
        };
        assert!(matches!(zero.validate(), Err(HoardError::Configuration(_))));
    }

    #[test]
    fn test_empty_registry_rejected() {
        let result = Hoard::new(Catalog::in_memory().unwrap(), vec![], HoardSettings::default());
        assert!(matches!(result, Err(HoardError::Configuration(_))));
    }

    #[test]
    fn test_unregistered_store_in_catalog() -> HoardResult<()> {
        let (hoard, _store) = memory_hoard(4, false);
        let id = hoard.catalog().record_file(
            None,
            1,
            &ContentHash::from_data(b"x"),
            &[ChunkLocation {
                ordering: 1,
                key: BlobKey::generate(),
                store: StoreId::new("elsewhere"),
            }],
        )?;

        assert!(matches!(hoard.open(id), Err(HoardError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn test_hash_stream_counts_bytes() -> HoardResult<()> {
        let data = vec![7u8; HASH_READ_SIZE * 2 + 5];
        let (size, hash) = hash_stream(&mut Cursor::new(&data))?;
        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, ContentHash::from_data(&data));
        Ok(())
    }
}
