//! SQLite-backed catalog of files and their ordered chunk lists.
//!
//! One connection is shared behind a `Mutex`, so a single `Catalog` can be used
//! from many threads. Each method holds the lock only for its own statements;
//! nothing here is held across byte-store I/O.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{HoardError, HoardResult};
use crate::hash::ContentHash;
use crate::key::{BlobKey, FileId, StoreId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    size INTEGER NOT NULL,
    hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS file_size_hash_idx ON file (size, hash);

CREATE TABLE IF NOT EXISTS chunk (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES file(id),
    ordering INTEGER NOT NULL,
    name TEXT NOT NULL,
    chunk_store TEXT NOT NULL,
    UNIQUE (file_id, ordering)
);
CREATE INDEX IF NOT EXISTS chunk_file_order_idx ON chunk (file_id, ordering, name);
"#;

/// A stored file as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: Option<String>,
    pub size: u64,
    pub hash: ContentHash,
}

/// Where one chunk of a file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub ordering: u32,
    pub key: BlobKey,
    pub store: StoreId,
}

/// Catalog database handle.
pub struct Catalog {
    connection: Mutex<Connection>,
}

impl Catalog {
    /// Open a file-backed catalog, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> HoardResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(path)?;
        connection.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        Self::initialize(connection)
    }

    /// Open a private in-memory catalog. Contents vanish on drop.
    pub fn in_memory() -> HoardResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(connection: Connection) -> HoardResult<Self> {
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn conn(&self) -> HoardResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| HoardError::CatalogPoisoned)
    }

    /// Insert a file row and return its new id.
    pub fn insert_file(
        &self,
        name: Option<&str>,
        size: u64,
        hash: &ContentHash,
    ) -> HoardResult<FileId> {
        let conn = self.conn()?;
        insert_file_row(&conn, name, size, hash)
    }

    /// Find an existing file with identical size and hash.
    pub fn find_duplicate(&self, size: u64, hash: &ContentHash) -> HoardResult<Option<FileId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM file WHERE size = ?1 AND hash = ?2 ORDER BY id LIMIT 1",
        )?;
        let id = stmt
            .query_row(params![size as i64, hash.as_str()], |row| row.get(0))
            .optional()?;
        Ok(id.map(FileId::new))
    }

    /// Insert one chunk row.
    pub fn insert_chunk(
        &self,
        file_id: FileId,
        ordering: u32,
        key: &BlobKey,
        store: &StoreId,
    ) -> HoardResult<()> {
        let conn = self.conn()?;
        insert_chunk_row(&conn, file_id, ordering, key, store)
    }

    /// Insert a file row and all of its chunk rows in one transaction.
    ///
    /// Either every row becomes visible or none does.
    pub fn record_file(
        &self,
        name: Option<&str>,
        size: u64,
        hash: &ContentHash,
        chunks: &[ChunkLocation],
    ) -> HoardResult<FileId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let file_id = insert_file_row(&tx, name, size, hash)?;
        for chunk in chunks {
            insert_chunk_row(&tx, file_id, chunk.ordering, &chunk.key, &chunk.store)?;
        }
        tx.commit()?;
        Ok(file_id)
    }

    /// Look up a file's metadata.
    pub fn get_file_meta(&self, file_id: FileId) -> HoardResult<FileRecord> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT id, name, size, hash FROM file WHERE id = ?1")?;
        let row = stmt
            .query_row(params![file_id.get()], read_file_row)
            .optional()?;
        row.transpose()?.ok_or(HoardError::FileNotFound(file_id))
    }

    /// A file's chunks in ascending `ordering`. Empty if the file is unknown.
    pub fn list_chunks(&self, file_id: FileId) -> HoardResult<Vec<ChunkLocation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT ordering, name, chunk_store FROM chunk
             WHERE file_id = ?1 ORDER BY ordering ASC",
        )?;
        let rows = stmt.query_map(params![file_id.get()], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (ordering, key, store) = row?;
            chunks.push(ChunkLocation {
                ordering,
                key: BlobKey::parse(&key)?,
                store: StoreId::new(store),
            });
        }
        Ok(chunks)
    }

    /// Delete a file's chunk rows, then its file row, in one transaction.
    ///
    /// Returns whether a file row existed.
    pub fn delete_file(&self, file_id: FileId) -> HoardResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunk WHERE file_id = ?1",
            params![file_id.get()],
        )?;
        let removed = tx.execute("DELETE FROM file WHERE id = ?1", params![file_id.get()])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Number of stored files.
    pub fn count_files(&self) -> HoardResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every stored file, oldest first.
    pub fn list_files(&self) -> HoardResult<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id, name, size, hash FROM file ORDER BY id")?;
        let rows = stmt.query_map([], read_file_row)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row??);
        }
        Ok(files)
    }
}

fn insert_file_row(
    conn: &Connection,
    name: Option<&str>,
    size: u64,
    hash: &ContentHash,
) -> HoardResult<FileId> {
    conn.execute(
        "INSERT INTO file (name, size, hash) VALUES (?1, ?2, ?3)",
        params![name, size as i64, hash.as_str()],
    )?;
    Ok(FileId::new(conn.last_insert_rowid()))
}

fn insert_chunk_row(
    conn: &Connection,
    file_id: FileId,
    ordering: u32,
    key: &BlobKey,
    store: &StoreId,
) -> HoardResult<()> {
    conn.execute(
        "INSERT INTO chunk (file_id, ordering, name, chunk_store) VALUES (?1, ?2, ?3, ?4)",
        params![file_id.get(), ordering, key.as_str(), store.as_str()],
    )?;
    Ok(())
}

/// Row mapper for `SELECT id, name, size, hash FROM file`.
///
/// The outer result carries SQLite errors; the inner one a malformed stored hash.
fn read_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HoardResult<FileRecord>> {
    let id: i64 = row.get(0)?;
    let name: Option<String> = row.get(1)?;
    let size: i64 = row.get(2)?;
    let hash: String = row.get(3)?;

    Ok(ContentHash::from_str_checked(&hash)
        .map_err(|e| HoardError::Configuration(format!("file {id} has corrupt hash: {e}")))
        .map(|hash| FileRecord {
            id: FileId::new(id),
            name,
            size: size as u64,
            hash,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(ordering: u32, store: &str) -> ChunkLocation {
        ChunkLocation {
            ordering,
            key: BlobKey::generate(),
            store: StoreId::new(store),
        }
    }

    #[test]
    fn test_schema_created() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let conn = catalog.conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('file', 'chunk')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 2);

        let indexes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index'
             AND name IN ('file_size_hash_idx', 'chunk_file_order_idx')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(indexes, 2);
        Ok(())
    }

    #[test]
    fn test_insert_and_get_file() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let hash = ContentHash::from_data(b"ABCDEFGHIJ");

        let id = catalog.insert_file(Some("letters.txt"), 10, &hash)?;
        let record = catalog.get_file_meta(id)?;

        assert_eq!(record.id, id);
        assert_eq!(record.name.as_deref(), Some("letters.txt"));
        assert_eq!(record.size, 10);
        assert_eq!(record.hash, hash);
        Ok(())
    }

    #[test]
    fn test_ids_increase_and_are_not_reused() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let hash = ContentHash::from_data(b"x");

        let first = catalog.insert_file(None, 1, &hash)?;
        let second = catalog.insert_file(None, 1, &hash)?;
        assert!(second > first);

        catalog.delete_file(second)?;
        let third = catalog.insert_file(None, 1, &hash)?;
        assert!(third > second);
        Ok(())
    }

    #[test]
    fn test_get_missing_file() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let err = catalog.get_file_meta(FileId::new(99)).unwrap_err();
        assert!(matches!(err, HoardError::FileNotFound(id) if id == FileId::new(99)));
        Ok(())
    }

    #[test]
    fn test_find_duplicate_matches_size_and_hash() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let hash = ContentHash::from_data(b"dup");

        assert_eq!(catalog.find_duplicate(3, &hash)?, None);

        let id = catalog.insert_file(None, 3, &hash)?;
        assert_eq!(catalog.find_duplicate(3, &hash)?, Some(id));
        assert_eq!(catalog.find_duplicate(4, &hash)?, None);
        assert_eq!(
            catalog.find_duplicate(3, &ContentHash::from_data(b"other"))?,
            None
        );
        Ok(())
    }

    #[test]
    fn test_chunks_come_back_ordered() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let id = catalog.insert_file(None, 12, &ContentHash::from_data(b"abc"))?;

        let third = chunk(3, "b");
        let first = chunk(1, "a");
        let second = chunk(2, "a");
        for c in [&third, &first, &second] {
            catalog.insert_chunk(id, c.ordering, &c.key, &c.store)?;
        }

        let chunks = catalog.list_chunks(id)?;
        assert_eq!(chunks, vec![first, second, third]);
        Ok(())
    }

    #[test]
    fn test_duplicate_ordering_rejected() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let id = catalog.insert_file(None, 8, &ContentHash::from_data(b"abc"))?;

        let c = chunk(1, "a");
        catalog.insert_chunk(id, 1, &c.key, &c.store)?;
        let result = catalog.insert_chunk(id, 1, &BlobKey::generate(), &c.store);
        assert!(matches!(result, Err(HoardError::Catalog(_))));
        Ok(())
    }

    #[test]
    fn test_chunk_requires_existing_file() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let c = chunk(1, "a");
        let result = catalog.insert_chunk(FileId::new(404), 1, &c.key, &c.store);
        assert!(matches!(result, Err(HoardError::Catalog(_))));
        Ok(())
    }

    #[test]
    fn test_record_file_is_atomic() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let hash = ContentHash::from_data(b"atomic");

        // Two chunks claiming ordering 1 violate the uniqueness constraint.
        let broken = [chunk(1, "a"), chunk(1, "b")];
        assert!(catalog.record_file(None, 6, &hash, &broken).is_err());
        assert_eq!(catalog.count_files()?, 0);

        let good = [chunk(1, "a"), chunk(2, "b")];
        let id = catalog.record_file(Some("ok"), 6, &hash, &good)?;
        assert_eq!(catalog.list_chunks(id)?, good.to_vec());
        Ok(())
    }

    #[test]
    fn test_delete_file_removes_rows() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let hash = ContentHash::from_data(b"gone");
        let id = catalog.record_file(None, 4, &hash, &[chunk(1, "a")])?;

        assert!(catalog.delete_file(id)?);
        assert!(catalog.list_chunks(id)?.is_empty());
        assert!(catalog.get_file_meta(id).is_err());
        assert_eq!(catalog.find_duplicate(4, &hash)?, None);

        assert!(!catalog.delete_file(id)?);
        Ok(())
    }

    #[test]
    fn test_count_and_list_files() -> HoardResult<()> {
        let catalog = Catalog::in_memory()?;
        let a = catalog.insert_file(Some("a"), 1, &ContentHash::from_data(b"a"))?;
        let b = catalog.insert_file(None, 2, &ContentHash::from_data(b"bb"))?;

        assert_eq!(catalog.count_files()?, 2);
        let ids: Vec<FileId> = catalog.list_files()?.into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_file_catalog_persists() -> HoardResult<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("catalog.db");
        let hash = ContentHash::from_data(b"persist");

        let id = {
            let catalog = Catalog::open(&path)?;
            catalog.record_file(Some("p"), 7, &hash, &[chunk(1, "a")])?
        };

        let reopened = Catalog::open(&path)?;
        assert_eq!(reopened.get_file_meta(id)?.hash, hash);
        assert_eq!(reopened.list_chunks(id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_shared_across_threads() -> HoardResult<()> {
        use std::sync::Arc;
        use std::thread;

        let catalog = Arc::new(Catalog::in_memory()?);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || {
                    let data = format!("thread {i}");
                    let hash = ContentHash::from_data(data.as_bytes());
                    catalog
                        .record_file(None, data.len() as u64, &hash, &[chunk(1, "a")])
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(catalog.count_files()?, 8);
        Ok(())
    }
}
