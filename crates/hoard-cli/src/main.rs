//! hoard - command-line access to a chunked, deduplicating file store
//!
//! Subcommands:
//! - `hoard init` - Create a hoard directory with its stores and catalog
//! - `hoard put <file>` - Ingest a file and print its id
//! - `hoard get <id>` - Write a stored file (or a byte range of it) out
//! - `hoard stat <id>` - Show a file's metadata as JSON
//! - `hoard ls` - List stored files
//! - `hoard rm <id>` - Delete a stored file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hoard::{FileId, DEFAULT_CHUNK_SIZE};

mod commands;

use commands::{parse_store_spec, StoreSpec};

#[derive(Parser)]
#[command(name = "hoard")]
#[command(about = "Chunked, deduplicating file store")]
#[command(version)]
struct Cli {
    /// Hoard directory (default: ~/.hoard)
    #[arg(long, global = true, env = "HOARD_DIR")]
    hoard_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new hoard
    Init {
        /// Chunk size in bytes for new files
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Store identical content again instead of deduplicating
        #[arg(long)]
        allow_duplicates: bool,

        /// Local store directory with optional weight; repeatable
        #[arg(
            long = "store",
            value_name = "PATH[:WEIGHT]",
            value_parser = parse_store_spec
        )]
        stores: Vec<StoreSpec>,
    },

    /// Ingest a file and print its id
    Put {
        /// File to ingest
        file: PathBuf,

        /// Name to record (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Write a stored file to stdout or a path
    Get {
        /// File id
        id: FileId,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start reading at this byte offset
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Read at most this many bytes
        #[arg(long)]
        length: Option<u64>,
    },

    /// Show a file's metadata
    Stat {
        /// File id
        id: FileId,
    },

    /// List stored files
    Ls,

    /// Delete a stored file
    Rm {
        /// File id
        id: FileId,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let dir = cli.hoard_dir.unwrap_or_else(hoard::default_hoard_dir);

    match cli.command {
        Commands::Init {
            chunk_size,
            allow_duplicates,
            stores,
        } => {
            commands::init(&dir, chunk_size, allow_duplicates, stores)?;
        }
        Commands::Put { file, name } => {
            commands::put(&dir, &file, name.as_deref())?;
        }
        Commands::Get {
            id,
            output,
            offset,
            length,
        } => {
            commands::get(&dir, id, output.as_deref(), offset, length)?;
        }
        Commands::Stat { id } => {
            commands::stat(&dir, id)?;
        }
        Commands::Ls => {
            commands::ls(&dir)?;
        }
        Commands::Rm { id } => {
            commands::rm(&dir, id)?;
        }
    }

    Ok(())
}
