//! Subcommand implementations.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hoard::{FileHoard, FileId, Hoard, HoardConfig};

/// A `--store PATH[:WEIGHT]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub path: PathBuf,
    pub weight: u32,
}

/// Parse `PATH[:WEIGHT]`. A suffix that is not a number stays part of the path.
pub fn parse_store_spec(s: &str) -> Result<StoreSpec, String> {
    if s.is_empty() {
        return Err("store path must not be empty".to_string());
    }
    if let Some((path, weight)) = s.rsplit_once(':') {
        if let Ok(weight) = weight.parse() {
            if path.is_empty() {
                return Err(format!("missing store path in {s:?}"));
            }
            return Ok(StoreSpec {
                path: PathBuf::from(path),
                weight,
            });
        }
    }
    Ok(StoreSpec {
        path: PathBuf::from(s),
        weight: 1,
    })
}

fn open_hoard(dir: &Path) -> Result<Hoard> {
    Hoard::open(dir).with_context(|| format!("failed to open hoard at {}", dir.display()))
}

pub fn init(
    dir: &Path,
    chunk_size: usize,
    allow_duplicates: bool,
    stores: Vec<StoreSpec>,
) -> Result<()> {
    let config = stores.into_iter().fold(
        HoardConfig::new()
            .with_chunk_size(chunk_size)
            .with_allow_duplicates(allow_duplicates),
        |config, spec| config.with_local_store(spec.path, spec.weight),
    );

    let hoard = Hoard::create(dir, config)
        .with_context(|| format!("failed to create hoard at {}", dir.display()))?;
    println!(
        "initialized hoard at {} with {} store(s)",
        dir.display(),
        hoard.store_ids().len()
    );
    Ok(())
}

pub fn put(dir: &Path, file: &Path, name: Option<&str>) -> Result<()> {
    let hoard = open_hoard(dir)?;
    let id = hoard
        .put_path(file, name)
        .with_context(|| format!("failed to store {}", file.display()))?;
    println!("{id}");
    Ok(())
}

pub fn get(
    dir: &Path,
    id: FileId,
    output: Option<&Path>,
    offset: u64,
    length: Option<u64>,
) -> Result<()> {
    let hoard = open_hoard(dir)?;
    let mut reader = hoard
        .open(id)
        .with_context(|| format!("failed to open file {id}"))?;
    reader.seek(SeekFrom::Start(offset))?;

    let mut source: Box<dyn Read> = match length {
        Some(n) => Box::new(reader.take(n)),
        None => Box::new(reader),
    };

    let copied = match output {
        Some(path) => {
            let mut out = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?,
            );
            let n = io::copy(&mut source, &mut out)?;
            out.flush()?;
            n
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let n = io::copy(&mut source, &mut out)?;
            out.flush()?;
            n
        }
    };

    tracing::debug!(file = %id, bytes = copied, "wrote file contents");
    Ok(())
}

pub fn stat(dir: &Path, id: FileId) -> Result<()> {
    let hoard = open_hoard(dir)?;
    let record = hoard
        .stat(id)
        .with_context(|| format!("failed to stat file {id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn ls(dir: &Path) -> Result<()> {
    let hoard = open_hoard(dir)?;
    for record in hoard.list()? {
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            record.size,
            record.hash,
            record.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn rm(dir: &Path, id: FileId) -> Result<()> {
    let hoard = open_hoard(dir)?;
    hoard
        .delete(id)
        .with_context(|| format!("failed to delete file {id}"))?;
    println!("deleted {id}");
    Ok(())
}
