//! Log directory management.
//!
//! This module handles the file system layout for the transaction history
//! log:
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK                 # Advisory lock for the single writer
//! ├─ thl.data.0000000001  # First segment
//! ├─ thl.data.0000000002  # Second segment (after rotation)
//! └─ thl.data.0000000003  # Current active segment
//! ```
//!
//! The LOCK file ensures only one process writes the log at a time. A
//! process that fails to take the lock still opens the directory - it
//! degrades to a read-only observer, since a replica commonly tails another
//! process's log files.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Lock file name within the log directory.
const LOCK_FILE: &str = "LOCK";

/// Prefix of every segment file name.
pub const DATA_FILE_PREFIX: &str = "thl.data.";

/// Width of the zero-padded decimal index suffix (digits of `i32::MAX`).
pub const FILE_INDEX_WIDTH: usize = 10;

/// Manages the log directory structure and write locking.
///
/// # Locking
///
/// [`LogDir::open`] attempts a non-blocking exclusive lock unless read-only
/// mode is requested. Lock failure is *not* an error: the directory opens
/// writable = false and the caller operates as an observer.
#[derive(Debug)]
pub struct LogDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle; `Some` only when this process holds the write lock.
    _lock_file: Option<File>,
    /// Whether this process may mutate the log.
    writable: bool,
}

impl LogDir {
    /// Opens or creates a log directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the log directory
    /// * `read_only` - Skip the lock and open as an observer
    /// * `create_if_missing` - Create the directory if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if the directory doesn't exist and
    /// `create_if_missing` is false, if the path is not a directory, or on
    /// I/O failure. Failing to acquire the write lock is not an error.
    pub fn open(path: &Path, read_only: bool, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing && !read_only {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "log directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        if read_only {
            return Ok(Self {
                path: path.to_path_buf(),
                _lock_file: None,
                writable: false,
            });
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_ok() {
            Ok(Self {
                path: path.to_path_buf(),
                _lock_file: Some(lock_file),
                writable: true,
            })
        } else {
            // Another process is writing; join as an observer.
            tracing::warn!(
                path = %path.display(),
                "log directory is locked by another process; opening read-only"
            );
            Ok(Self {
                path: path.to_path_buf(),
                _lock_file: None,
                writable: false,
            })
        }
    }

    /// Returns the path to the log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this process holds the write lock.
    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Builds the file name for a segment index, e.g. `thl.data.0000000001`.
    #[must_use]
    pub fn data_file_name(index: u32) -> String {
        format!("{DATA_FILE_PREFIX}{index:0width$}", width = FILE_INDEX_WIDTH)
    }

    /// Parses the numeric index out of a segment file name.
    ///
    /// Returns `None` for names that are not well-formed segment files.
    #[must_use]
    pub fn parse_file_index(name: &str) -> Option<u32> {
        let suffix = name.strip_prefix(DATA_FILE_PREFIX)?;
        if suffix.len() != FILE_INDEX_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    /// Returns the full path of a segment file.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Lists segment file names in the directory, sorted by numeric index.
    ///
    /// Files that don't match the segment naming scheme are ignored.
    pub fn list_segment_files(&self) -> CoreResult<Vec<String>> {
        let mut files: Vec<(u32, String)> = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(index) = Self::parse_file_index(name) {
                files.push((index, name.to_string()));
            }
        }

        files.sort_by_key(|(index, _)| *index);
        Ok(files.into_iter().map(|(_, name)| name).collect())
    }

    /// Returns the modification time of a segment file.
    pub fn file_modified(&self, name: &str) -> CoreResult<SystemTime> {
        Ok(fs::metadata(self.file_path(name))?.modified()?)
    }

    /// Deletes a segment file from disk.
    pub fn delete_segment_file(&self, name: &str) -> CoreResult<()> {
        let path = self.file_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
            self.sync_directory()?;
        }
        Ok(())
    }

    /// Syncs the log directory so file creations and deletions are durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Syncs the log directory so file creations and deletions are durable.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journaling covers metadata durability; directory fsync is a
        // Unix notion.
        Ok(())
    }
}
