// SPDX-License-Identifier: Apache-2.0
//! Durable per-log cursor: the last tree index this engine has fully
//! ingested, one file per log, written atomically so a crash never
//! leaves a cursor pointing at a half-written value.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Cursor storage rooted at one directory, one file per log
/// (the directory named by `OFFSETS_DIR`).
#[derive(Debug, Clone)]
pub struct OffsetStore {
    dir: PathBuf,
}

/// The cursor file existed but its content could not be trusted.
/// Treated as fatal for that log's worker: ingestion must not guess a
/// starting point and risk silently skipping entries.
#[derive(Debug)]
pub struct CorruptOffset {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CorruptOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "corrupt offset file {}: {}",
            self.path.display(),
            self.reason
        )
    }
}

impl std::error::Error for CorruptOffset {}

impl OffsetStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ensure the root directory exists. Call once at startup.
    pub fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    fn path_for(&self, log_name: &str) -> PathBuf {
        self.dir.join(format!("{log_name}.offset"))
    }

    /// Read the last-ingested index for `log_name`, or `None` if this
    /// log has never been ingested before (ingestion then starts from
    /// index 0).
    ///
    /// # Errors
    /// Returns [`CorruptOffset`] if the file exists but its content is
    /// not a plain non-negative integer.
    pub fn load(&self, log_name: &str) -> Result<Option<u64>, CorruptOffset> {
        let path = self.path_for(log_name);
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CorruptOffset {
                    path,
                    reason: err.to_string(),
                })
            }
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|err| CorruptOffset {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        contents.trim().parse::<u64>().map(Some).map_err(|err| CorruptOffset {
            path,
            reason: err.to_string(),
        })
    }

    /// Persist `index` as the new cursor for `log_name`. Writes to a
    /// sibling temp file, fsyncs it, then renames over the real path —
    /// the rename is atomic on the same filesystem, so readers never
    /// observe a partially-written cursor.
    ///
    /// # Errors
    /// Returns the underlying I/O error on write, sync, or rename failure.
    pub fn store(&self, log_name: &str, index: u64) -> io::Result<()> {
        let path = self.path_for(log_name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        write!(tmp, "{index}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|persist_err| persist_err.error)?;
        sync_parent_dir(&self.dir)?;
        Ok(())
    }
}

fn sync_parent_dir(dir: &Path) -> io::Result<()> {
    // Best-effort: fsync the directory entry itself so the rename
    // survives a crash, not just the file content. Not all platforms
    // support opening a directory for this; ignore if so.
    if let Ok(dir_handle) = fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}
