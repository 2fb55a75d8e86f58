//! Hoard configuration, stored as `hoard.toml` in the hoard directory.
//!
//! ```toml
//! [hoard]
//! hoard_id = "3f2a..."
//! chunk_size = 262144
//! allow_duplicates = false
//!
//! [catalog]
//! kind = "sqlite"
//! path = "catalog.db"
//!
//! [[stores]]
//! store_id = "9b1c..."
//! kind = "local"
//! path = "stores/9b1c..."
//! weight = 1
//! ```
//!
//! Relative paths resolve against the hoard directory.
//!
//! Environment variables (applied by [`HoardConfig::apply_env_overrides`]):
//! - `HOARD_CHUNK_SIZE`: chunk size for new files
//! - `HOARD_ALLOW_DUPLICATES`: "true" or "1" to skip dedup

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::engine::{HoardSettings, DEFAULT_CHUNK_SIZE};
use crate::error::{HoardError, HoardResult};
use crate::key::StoreId;
use crate::placement::WeightedPlacement;
use crate::store::{ChunkStore, LocalChunkStore};

/// Name of the config file inside a hoard directory.
pub const HOARD_CONFIG_FILE: &str = "hoard.toml";

/// Whole-hoard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoardConfig {
    pub hoard: HoardSection,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoardSection {
    pub hoard_id: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub allow_duplicates: bool,
}

/// Where file and chunk rows live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// `"sqlite"` or `"memory"`.
    #[serde(default = "default_catalog_kind")]
    pub kind: String,
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

/// One registered chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub store_id: StoreId,
    #[serde(default = "default_store_kind")]
    pub kind: String,
    pub path: PathBuf,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_catalog_kind() -> String {
    "sqlite".to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.db")
}

fn default_store_kind() -> String {
    "local".to_string()
}

fn default_weight() -> u32 {
    1
}

/// Default hoard directory (`~/.hoard`).
pub fn default_hoard_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".hoard"))
        .unwrap_or_else(|| PathBuf::from(".hoard"))
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            kind: default_catalog_kind(),
            path: default_catalog_path(),
        }
    }
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HoardConfig {
    /// A fresh config with a random hoard id and no stores.
    pub fn new() -> Self {
        Self {
            hoard: HoardSection {
                hoard_id: Uuid::new_v4().simple().to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                allow_duplicates: false,
            },
            catalog: CatalogConfig::default(),
            stores: Vec::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.hoard.chunk_size = chunk_size;
        self
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.hoard.allow_duplicates = allow;
        self
    }

    /// Register a new local store with a fresh id.
    pub fn with_local_store(mut self, path: impl Into<PathBuf>, weight: u32) -> Self {
        self.stores.push(StoreConfig {
            store_id: StoreId::generate(),
            kind: default_store_kind(),
            path: path.into(),
            weight,
        });
        self
    }

    /// Engine settings carried by this config.
    pub fn settings(&self) -> HoardSettings {
        HoardSettings {
            chunk_size: self.hoard.chunk_size,
            allow_duplicates: self.hoard.allow_duplicates,
        }
    }

    /// Check everything that can be checked without touching disk: chunk
    /// size, catalog and store kinds, and the store ids and weights.
    pub fn validate(&self) -> HoardResult<()> {
        self.settings().validate()?;
        self.catalog.check_kind()?;
        for store in &self.stores {
            store.check_kind()?;
        }
        let weights = self.stores.iter().map(|s| (s.store_id.clone(), s.weight));
        WeightedPlacement::new(weights)?;
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> HoardResult<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| HoardError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> HoardResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `HOARD_*` environment variables. Returns the names that took effect.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(size) = lookup("HOARD_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.hoard.chunk_size = size;
            applied.push("HOARD_CHUNK_SIZE");
        }
        if let Some(v) = lookup("HOARD_ALLOW_DUPLICATES") {
            self.hoard.allow_duplicates = v.eq_ignore_ascii_case("true") || v == "1";
            applied.push("HOARD_ALLOW_DUPLICATES");
        }

        applied
    }
}

impl CatalogConfig {
    /// Open the configured catalog, creating its schema if needed.
    pub fn connect(&self, base: &Path) -> HoardResult<Catalog> {
        self.check_kind()?;
        match self.kind.as_str() {
            "memory" => Catalog::in_memory(),
            _ => Catalog::open(resolve(base, &self.path)),
        }
    }

    fn check_kind(&self) -> HoardResult<()> {
        match self.kind.as_str() {
            "sqlite" | "memory" => Ok(()),
            other => Err(HoardError::Configuration(format!(
                "unsupported catalog kind {other:?}"
            ))),
        }
    }
}

impl StoreConfig {
    pub fn root(&self, base: &Path) -> PathBuf {
        resolve(base, &self.path)
    }

    /// Initialize the store on disk and return it.
    pub fn create(&self, base: &Path) -> HoardResult<Arc<dyn ChunkStore>> {
        self.check_kind()?;
        let store = LocalChunkStore::create(self.root(base), self.store_id.clone())?;
        Ok(Arc::new(store))
    }

    /// Open an existing store, verifying its descriptor matches this entry.
    pub fn open(&self, base: &Path) -> HoardResult<Arc<dyn ChunkStore>> {
        self.check_kind()?;
        let root = self.root(base);
        let store = LocalChunkStore::open(&root)?;
        if store.id() != &self.store_id {
            return Err(HoardError::Configuration(format!(
                "store at {} has id {}, config expects {}",
                root.display(),
                store.id(),
                self.store_id
            )));
        }
        Ok(Arc::new(store))
    }

    fn check_kind(&self) -> HoardResult<()> {
        if self.kind == "local" {
            Ok(())
        } else {
            Err(HoardError::Configuration(format!(
                "unsupported store kind {:?} for store {}",
                self.kind, self.store_id
            )))
        }
    }
}
