//! HoardReader: one seekable byte stream spanning every chunk of a file.
//!
//! Chunk handles are only ever rewound to their own start or moved forward.
//! A seek behind the current position resets every handle and replays
//! forward from the beginning, so backends whose handles seek backward
//! poorly still work.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::{trace, warn};

use crate::key::FileId;
use crate::store::ChunkReader;

/// Sequential, seekable reader over an ordered list of chunk handles.
///
/// Owns its handles; they are released by [`HoardReader::close`] or on drop.
pub struct HoardReader {
    file_id: FileId,
    size: u64,
    handles: Vec<Box<dyn ChunkReader>>,
    /// Index of the first handle not yet drained.
    current: usize,
    position: u64,
}

impl HoardReader {
    pub(crate) fn new(file_id: FileId, size: u64, handles: Vec<Box<dyn ChunkReader>>) -> Self {
        Self {
            file_id,
            size,
            handles,
            current: 0,
            position: 0,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Total logical length of the file.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.handles.len()
    }

    /// Logical position: bytes consumed by reads and seeks so far.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Release every chunk handle.
    pub fn close(mut self) {
        self.handles.clear();
    }

    /// Rewind every handle to its own start.
    fn reset(&mut self) -> io::Result<()> {
        for handle in &mut self.handles {
            handle.seek(SeekFrom::Start(0))?;
        }
        self.current = 0;
        self.position = 0;
        Ok(())
    }

    /// Consume `n` bytes forward from the current handle without reading them.
    ///
    /// Returns how many bytes were actually skipped; less than `n` only when
    /// every handle is drained.
    fn advance(&mut self, n: u64) -> io::Result<u64> {
        let mut left = n;
        while left > 0 && self.current < self.handles.len() {
            let handle = &mut self.handles[self.current];
            let start = handle.stream_position()?;
            let end = handle.seek(SeekFrom::End(0))?;
            let available = end.saturating_sub(start);

            if available > left {
                handle.seek(SeekFrom::Start(start + left))?;
                left = 0;
            } else {
                left -= available;
                self.current += 1;
            }
        }
        Ok(n - left)
    }
}

impl Read for HoardReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.current < self.handles.len() {
            let n = self.handles[self.current].read(buf)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

impl Seek for HoardReader {
    /// Seek to an absolute logical offset.
    ///
    /// `End(d)` targets `len() + d`, so the last `k` bytes start at `End(-k)`.
    /// `Current(d)` is a true relative seek. Targets past the end are allowed;
    /// reads there return nothing.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.position.checked_add_signed(d),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        if target < self.position {
            trace!(file = %self.file_id, from = self.position, to = target, "replaying from start");
            self.reset()?;
        }

        let wanted = target - self.position;
        let skipped = match self.advance(wanted) {
            Ok(n) => n,
            Err(e) => {
                // A partial advance leaves handles at unknown offsets; start over.
                if let Err(reset_err) = self.reset() {
                    warn!(
                        file = %self.file_id,
                        error = %reset_err,
                        "rewind after failed seek also failed"
                    );
                }
                return Err(e);
            }
        };
        self.position += skipped;
        // Past the end: every handle is drained, remember where the caller asked to be.
        self.position = self.position.max(target);
        Ok(self.position)
    }
}

impl std::fmt::Debug for HoardReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoardReader")
            .field("file_id", &self.file_id)
            .field("size", &self.size)
            .field("chunks", &self.handles.len())
            .field("current", &self.current)
            .field("position", &self.position)
            .finish()
    }
}
