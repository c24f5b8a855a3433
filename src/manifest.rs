//! Append-only cleanup manifest shared by every test worker process.
//!
//! Each decision is one JSON line. Appends take an exclusive `flock` on the
//! file for the duration of that single write, so concurrent workers never
//! interleave lines. The coordinator reads the whole file once and deletes it.
//! File I/O is synchronous `std::fs`; these are short local operations.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::record::ExecutionRecord;

/// Errors produced by manifest operations.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Filesystem failure on the manifest path.
    #[error("manifest I/O failed for {path}: {source}")]
    Io {
        /// Manifest path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The advisory lock could not be taken or released.
    #[error("manifest lock failed for {path}: {errno}")]
    Lock {
        /// Manifest path involved.
        path: PathBuf,
        /// Errno reported by `flock(2)`.
        errno: Errno,
    },
    /// A record could not be encoded.
    #[error("failed to encode manifest record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Handle on the manifest file at a well-known path.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Create a store for the manifest at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Manifest file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a manifest is pending.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Append one record as a single line under an exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded, the file cannot be
    /// opened or written, or the lock cannot be taken.
    pub fn append(&self, record: &ExecutionRecord) -> Result<(), ManifestError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.lock_error(errno))?;

        // Whole line in one write so a reader never sees a partial record.
        let written = locked
            .write_all(line.as_bytes())
            .and_then(|()| locked.flush());

        let unlocked = locked.unlock().map_err(|(_, errno)| self.lock_error(errno));
        written.map_err(|source| self.io_error(source))?;
        unlocked?;

        debug!(
            path = %self.path.display(),
            node_id = %record.node_id,
            action = %record.action,
            "manifest record appended"
        );
        Ok(())
    }

    /// Read every well-formed record currently persisted.
    ///
    /// Malformed lines are logged and skipped. A missing manifest yields an
    /// empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_all(&self) -> Result<Vec<ExecutionRecord>, ManifestError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let mut records = Vec::new();
        // Raw bytes per line: a torn write may not even be valid UTF-8.
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|source| self.io_error(source))?;
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<ExecutionRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index.saturating_add(1),
                    error = %e,
                    "skipping malformed manifest line"
                ),
            }
        }
        Ok(records)
    }

    /// Delete the manifest. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), ManifestError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> ManifestError {
        ManifestError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn lock_error(&self, errno: Errno) -> ManifestError {
        ManifestError::Lock {
            path: self.path.clone(),
            errno,
        }
    }
}
