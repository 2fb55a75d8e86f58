//! Chunked, deduplicating file store.
//!
//! A hoard splits each ingested stream into fixed-size chunks, writes every
//! chunk as an opaque blob into one of several registered byte-stores chosen
//! by weight, and records files and chunk locations in a relational catalog.
//! Retrieval stitches the chunks back into one seekable stream.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Read;
//! use hoard::{FileHoard, Hoard, HoardConfig};
//!
//! let hoard = Hoard::create("/tmp/my-hoard", HoardConfig::new()).unwrap();
//!
//! let id = hoard.put_bytes(b"Hello, World!", Some("hello.txt")).unwrap();
//!
//! let mut reader = hoard.open(id).unwrap();
//! let mut text = String::new();
//! reader.read_to_string(&mut text).unwrap();
//! assert_eq!(text, "Hello, World!");
//!
//! hoard.delete(id).unwrap();
//! ```
//!
//! # Deduplication
//!
//! Unless `allow_duplicates` is set, a stream whose byte count and digest
//! match an existing file is not stored again; `put` returns the existing id.
//! The digest is BLAKE3 truncated to 128 bits and is not a security boundary.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod key;
pub mod placement;
pub mod reader;
pub mod store;

pub use catalog::{Catalog, ChunkLocation, FileRecord};
pub use config::{default_hoard_dir, HoardConfig, HOARD_CONFIG_FILE};
pub use engine::{FileHoard, Hoard, HoardSettings, RegisteredStore, DEFAULT_CHUNK_SIZE};
pub use error::{HoardError, HoardResult};
pub use hash::{ContentHash, ContentHasher, HashError};
pub use key::{BlobKey, FileId, StoreId};
pub use placement::WeightedPlacement;
pub use reader::HoardReader;
pub use store::{ChunkReader, ChunkStore, LocalChunkStore, MemoryChunkStore};
