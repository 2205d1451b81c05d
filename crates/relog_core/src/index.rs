//! In-memory segment index.
//!
//! The index is the authoritative catalog of segment files and the sequence
//! number range each one covers. It is rebuilt from disk at startup and
//! patched in memory as the writer appends and rotates.
//!
//! Healthy catalogs are contiguous: `entry[i].end + 1 == entry[i+1].start`
//! with no gaps or overlaps. The last entry's end tracks the highest stored
//! sequence number and is patched on every append.

use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentFile;
use crate::types::Seqno;
use parking_lot::Mutex;
use relog_storage::{FileBackend, StorageBackend};
use std::time::{Duration, SystemTime};

/// One catalog entry: a segment file and the sequence range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// First sequence number stored in the file ([`Seqno::UNKNOWN`] for a
    /// fresh first segment that has no events yet).
    pub start_seqno: Seqno,
    /// Last sequence number stored in the file ([`Seqno::UNKNOWN`] while the
    /// file is the active tail).
    pub end_seqno: Seqno,
    /// Segment file name.
    pub file_name: String,
}

/// Sorted catalog of segments, guarded by one coarse lock.
///
/// Mutations are rare (rotation, retention, recovery) and reads are cheap
/// linear scans over a handful of entries, so a single mutex shared by the
/// writer and all readers is enough.
#[derive(Debug)]
pub struct SegmentIndex {
    entries: Mutex<Vec<IndexEntry>>,
    retention: Duration,
}

impl SegmentIndex {
    /// Creates an empty index with the given retention window
    /// (`Duration::ZERO` disables purging).
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            retention,
        }
    }

    /// Rebuilds the catalog by scanning the log directory.
    ///
    /// Files are sorted by their numeric suffix. Each header's base sequence
    /// number becomes the entry start; a -1 base (first file created before
    /// its first event was known) is resolved by peeking the first stored
    /// record. Every entry's end is the next entry's start minus one; the
    /// last entry's end stays unknown until recovery patches it.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be opened or has an invalid
    /// header.
    pub fn build(&self, dir: &LogDir) -> CoreResult<()> {
        let files = dir.list_segment_files()?;
        let mut entries = Vec::with_capacity(files.len());

        for (i, name) in files.iter().enumerate() {
            let name = name.clone();
            let backend = FileBackend::open_read_only(&dir.file_path(&name))?;

            // A trailing file shorter than its header is a stub from a crash
            // between file creation and header write. The predecessor still
            // ends with the rotation marker, so recovery recreates the
            // successor; the stub itself carries no information.
            if i + 1 == files.len() && backend.size()? < crate::segment::HEADER_SIZE {
                tracing::warn!(file = %name, "ignoring headerless segment stub");
                continue;
            }

            let mut segment = SegmentFile::prepare_read(name.clone(), Box::new(backend))?;

            let mut start = segment.base_seqno();
            if start.is_unknown() {
                if let Some(seqno) = segment.peek_first_seqno()? {
                    start = seqno;
                }
            }

            entries.push(IndexEntry {
                start_seqno: start,
                end_seqno: Seqno::UNKNOWN,
                file_name: name,
            });
        }

        for i in 0..entries.len().saturating_sub(1) {
            entries[i].end_seqno = entries[i + 1].start_seqno.prev();
        }

        tracing::debug!(segments = entries.len(), "segment index built");
        *self.entries.lock() = entries;
        Ok(())
    }

    /// Returns the number of cataloged segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a snapshot of all entries.
    #[must_use]
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries.lock().clone()
    }

    /// Returns the lowest sequence number in the log, if any events exist.
    #[must_use]
    pub fn min_seqno(&self) -> Option<Seqno> {
        let entries = self.entries.lock();
        let first = entries.first()?;
        if first.start_seqno.is_unknown() {
            None
        } else {
            Some(first.start_seqno)
        }
    }

    /// Returns the highest stored sequence number, if any events exist.
    #[must_use]
    pub fn max_seqno(&self) -> Option<Seqno> {
        let entries = self.entries.lock();
        let last = entries.last()?;
        if last.end_seqno.is_unknown() {
            None
        } else {
            Some(last.end_seqno)
        }
    }

    /// Returns the file containing `seqno`.
    ///
    /// A seqno beyond every known range maps to the last (active) segment,
    /// where a tailing reader should wait. A seqno below the minimum maps to
    /// nothing - those events are definitely gone.
    #[must_use]
    pub fn file_for(&self, seqno: Seqno) -> Option<String> {
        let entries = self.entries.lock();
        let first = entries.first()?;

        if !first.start_seqno.is_unknown() && seqno < first.start_seqno {
            return None;
        }

        for entry in entries.iter() {
            if !entry.start_seqno.is_unknown()
                && !entry.end_seqno.is_unknown()
                && entry.start_seqno <= seqno
                && seqno <= entry.end_seqno
            {
                return Some(entry.file_name.clone());
            }
        }

        entries.last().map(|e| e.file_name.clone())
    }

    /// Returns the name of the active (last) segment.
    #[must_use]
    pub fn last_file(&self) -> Option<String> {
        self.entries.lock().last().map(|e| e.file_name.clone())
    }

    /// Returns the name of the oldest segment.
    #[must_use]
    pub fn first_file(&self) -> Option<String> {
        self.entries.lock().first().map(|e| e.file_name.clone())
    }

    /// Returns the entry for the named file.
    #[must_use]
    pub fn entry_for(&self, file_name: &str) -> Option<IndexEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.file_name == file_name)
            .cloned()
    }

    /// Patches the active entry's end to the highest stored sequence number.
    ///
    /// Also resolves the start if it still carries the -1 sentinel (the very
    /// first event of a fresh log).
    pub fn set_max_indexed_seqno(&self, seqno: Seqno) {
        let mut entries = self.entries.lock();
        if let Some(last) = entries.last_mut() {
            last.end_seqno = seqno;
            if last.start_seqno.is_unknown() && !seqno.is_unknown() {
                last.start_seqno = seqno;
            }
        }
    }

    /// Appends a new active segment to the catalog, then applies retention.
    ///
    /// The previous active entry's end, if still unknown, is finalized to
    /// `start_seqno - 1`; an end already patched by the writer is left
    /// alone so [`Self::validate`] can catch a discontinuous successor.
    /// With retention enabled, segments older than the window are removed
    /// from the catalog and deleted from disk; the two most recent segments
    /// are always preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if purged files cannot be deleted.
    pub fn add_new_file(
        &self,
        dir: &LogDir,
        start_seqno: Seqno,
        file_name: impl Into<String>,
    ) -> CoreResult<()> {
        let file_name = file_name.into();
        let mut purged = Vec::new();

        {
            let mut entries = self.entries.lock();
            if let Some(last) = entries.last_mut() {
                if last.end_seqno.is_unknown() {
                    last.end_seqno = start_seqno.prev();
                }
            }
            entries.push(IndexEntry {
                start_seqno,
                end_seqno: Seqno::UNKNOWN,
                file_name: file_name.clone(),
            });

            if !self.retention.is_zero() {
                let now = SystemTime::now();
                // Purge oldest-first so the catalog stays contiguous; always
                // keep the two most recent files.
                while entries.len() > 2 {
                    let oldest = &entries[0];
                    let expired = match dir.file_modified(&oldest.file_name) {
                        Ok(modified) => now
                            .duration_since(modified)
                            .map(|age| age > self.retention)
                            .unwrap_or(false),
                        Err(_) => false,
                    };
                    if !expired {
                        break;
                    }
                    purged.push(entries.remove(0));
                }
            }
        }

        for entry in &purged {
            tracing::info!(
                file = %entry.file_name,
                start = %entry.start_seqno,
                end = %entry.end_seqno,
                "purging segment past retention window"
            );
            dir.delete_segment_file(&entry.file_name)?;
        }

        Ok(())
    }

    /// Removes the named entry from the catalog.
    ///
    /// Returns whether an entry was removed. The file itself is the
    /// caller's to delete.
    pub fn remove_entry(&self, file_name: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.file_name != file_name);
        entries.len() != before
    }

    /// Checks that every cataloged file exists and the sequence ranges are
    /// contiguous.
    ///
    /// # Errors
    ///
    /// Returns an error on the first missing file, gap, or overlap.
    pub fn validate(&self, dir: &LogDir) -> CoreResult<()> {
        let entries = self.entries.lock();

        for entry in entries.iter() {
            if !dir.file_path(&entry.file_name).exists() {
                return Err(CoreError::invalid_format(format!(
                    "indexed segment {} is missing from disk",
                    entry.file_name
                )));
            }
        }

        for pair in entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.end_seqno.next() != next.start_seqno {
                return Err(CoreError::invalid_format(format!(
                    "sequence range mismatch between {} (ends {}) and {} (starts {})",
                    prev.file_name, prev.end_seqno, next.file_name, next.start_seqno
                )));
            }
        }

        Ok(())
    }
}
