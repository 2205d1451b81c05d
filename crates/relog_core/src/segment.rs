//! Segment file I/O.
//!
//! A segment is one physical file in the log chain. Every segment starts
//! with a fixed 16-byte header:
//!
//! ```text
//! | magic (4, BE) = 0xC001CAFE | major (2, BE) | minor (2, BE) | base_seqno (8, BE) |
//! ```
//!
//! `base_seqno` is the sequence number of the first transaction stored in
//! the file, or -1 when the file was created before its first event was
//! known (only ever the very first segment of a log).
//!
//! Records follow the header back to back. A segment has exactly one
//! appender at a time; the write path seeks to end-of-file before every
//! append so a stale cursor can never overwrite data.

use crate::error::{CoreError, CoreResult};
use crate::record::{LogRecord, ReadOutcome};
use crate::types::Seqno;
use relog_storage::StorageBackend;
use std::time::{Duration, Instant};

/// Magic number at the start of every segment file.
pub const SEGMENT_MAGIC: u32 = 0xC001_CAFE;

/// Current major format version. A mismatch is fatal.
pub const MAJOR_VERSION: u16 = 1;

/// Current minor format version. A mismatch is logged and tolerated.
pub const MINOR_VERSION: u16 = 1;

/// Size of the segment header in bytes.
pub const HEADER_SIZE: u64 = 16;

/// I/O on one physical segment file.
///
/// The handle tracks a private read cursor; writes always go to end-of-file
/// regardless of the cursor. Each log client leases its own `SegmentFile`,
/// so the handle itself needs no locking.
pub struct SegmentFile {
    /// Segment file name (not a full path - the directory layer owns paths).
    name: String,
    /// Underlying byte store.
    backend: Box<dyn StorageBackend>,
    /// Read cursor, positioned after the header on open.
    read_pos: u64,
    /// Base sequence number from the header.
    base_seqno: Seqno,
    /// Format version from the header.
    version: (u16, u16),
    /// Whether this handle may append and truncate.
    writable: bool,
    /// Minimum interval between fsyncs on the write path.
    fsync_interval: Duration,
    /// When the file was last fsynced.
    last_sync: Instant,
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("name", &self.name)
            .field("read_pos", &self.read_pos)
            .field("base_seqno", &self.base_seqno)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl SegmentFile {
    /// Opens a segment for writing, creating it if empty.
    ///
    /// A new (zero-length) backend gets a fresh header with the given
    /// `base_seqno`. An existing one has its header validated instead; the
    /// stored base sequence number wins over the argument.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, bad magic, or a major version
    /// mismatch. Passing a read-only backend is a misuse error.
    pub fn prepare_write(
        name: impl Into<String>,
        mut backend: Box<dyn StorageBackend>,
        base_seqno: Seqno,
        fsync_interval: Duration,
    ) -> CoreResult<Self> {
        let name = name.into();
        if !backend.writable() {
            return Err(CoreError::misuse(format!(
                "segment {name} opened for writing on a read-only handle"
            )));
        }

        let size = backend.size()?;
        let (version, base_seqno) = if size == 0 {
            let mut header = Vec::with_capacity(HEADER_SIZE as usize);
            header.extend_from_slice(&SEGMENT_MAGIC.to_be_bytes());
            header.extend_from_slice(&MAJOR_VERSION.to_be_bytes());
            header.extend_from_slice(&MINOR_VERSION.to_be_bytes());
            header.extend_from_slice(&base_seqno.as_i64().to_be_bytes());
            backend.append(&header)?;
            backend.sync()?;
            ((MAJOR_VERSION, MINOR_VERSION), base_seqno)
        } else {
            Self::validate_header(&name, backend.as_ref())?
        };

        Ok(Self {
            name,
            backend,
            read_pos: HEADER_SIZE,
            base_seqno,
            version,
            writable: true,
            fsync_interval,
            last_sync: Instant::now(),
        })
    }

    /// Opens an existing segment read-only.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, bad magic, or a major version
    /// mismatch.
    pub fn prepare_read(
        name: impl Into<String>,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let name = name.into();
        let (version, base_seqno) = Self::validate_header(&name, backend.as_ref())?;

        Ok(Self {
            name,
            backend,
            read_pos: HEADER_SIZE,
            base_seqno,
            version,
            writable: false,
            fsync_interval: Duration::ZERO,
            last_sync: Instant::now(),
        })
    }

    /// Reads and checks the 16-byte header.
    fn validate_header(
        name: &str,
        backend: &dyn StorageBackend,
    ) -> CoreResult<((u16, u16), Seqno)> {
        if backend.size()? < HEADER_SIZE {
            return Err(CoreError::invalid_format(format!(
                "segment {name} is shorter than its header"
            )));
        }

        let buf = backend.read_at(0, HEADER_SIZE as usize)?;
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != SEGMENT_MAGIC {
            return Err(CoreError::invalid_format(format!(
                "segment {name} has bad magic 0x{magic:08x}, expected 0x{SEGMENT_MAGIC:08x}"
            )));
        }

        let major = u16::from_be_bytes([buf[4], buf[5]]);
        let minor = u16::from_be_bytes([buf[6], buf[7]]);
        if major != MAJOR_VERSION {
            return Err(CoreError::invalid_format(format!(
                "segment {name} has major version {major}, this build reads {MAJOR_VERSION}"
            )));
        }
        if minor != MINOR_VERSION {
            tracing::warn!(
                segment = name,
                found = minor,
                expected = MINOR_VERSION,
                "segment minor version differs; continuing"
            );
        }

        let base = i64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);

        Ok(((major, minor), Seqno::new(base)))
    }

    /// Returns the segment file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base sequence number from the header.
    #[must_use]
    pub fn base_seqno(&self) -> Seqno {
        self.base_seqno
    }

    /// Returns the header format version.
    #[must_use]
    pub fn version(&self) -> (u16, u16) {
        self.version
    }

    /// Returns whether this handle may append.
    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Returns the current read cursor position.
    #[must_use]
    pub fn read_pos(&self) -> u64 {
        self.read_pos
    }

    /// Returns the current file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Repositions the read cursor just after the header.
    pub fn seek_to_start(&mut self) {
        self.read_pos = HEADER_SIZE;
    }

    /// Repositions the read cursor to an absolute byte offset.
    ///
    /// The caller is expected to pass an offset previously observed as a
    /// record boundary.
    pub fn seek_to(&mut self, pos: u64) {
        self.read_pos = pos;
    }

    /// Reads the next record at the cursor, advancing past it on success.
    ///
    /// Blocking policy is the record layer's: `wait = None` never blocks,
    /// `wait = Some(d)` polls for growth until the deadline.
    ///
    /// # Errors
    ///
    /// Returns an error only on I/O failure.
    pub fn read_record(&mut self, wait: Option<Duration>) -> CoreResult<ReadOutcome> {
        let outcome = LogRecord::read_from(self.backend.as_ref(), self.read_pos, wait)?;
        if let ReadOutcome::Record(ref record) = outcome {
            self.read_pos += record.encoded_size() as u64;
        }
        Ok(outcome)
    }

    /// Appends a record at end-of-file.
    ///
    /// Fsyncs when the configured interval has elapsed since the last sync.
    /// Returns `true` when the file now exceeds `rotation_threshold` *and*
    /// `completes_txn` is set - rotation never happens mid-transaction, so
    /// the signal is suppressed for non-final fragments.
    ///
    /// # Errors
    ///
    /// Writing through a read-only handle is a misuse error; otherwise only
    /// I/O failures.
    pub fn write_record(
        &mut self,
        record: &LogRecord,
        rotation_threshold: u64,
        completes_txn: bool,
    ) -> CoreResult<bool> {
        if !self.writable {
            return Err(CoreError::misuse(format!(
                "write on read-only segment handle {}",
                self.name
            )));
        }

        let encoded = record.encode();
        let offset = self.backend.append(&encoded)?;

        if self.last_sync.elapsed() >= self.fsync_interval {
            self.sync()?;
        }

        let new_size = offset + encoded.len() as u64;
        Ok(new_size > rotation_threshold && completes_txn)
    }

    /// Forces an fsync of the segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails or the handle is read-only.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Hard-truncates the segment to `new_length` and fsyncs.
    ///
    /// Used only during recovery repair and boundary deletes.
    ///
    /// # Errors
    ///
    /// Truncating through a read-only handle is a misuse error.
    pub fn set_length(&mut self, new_length: u64) -> CoreResult<()> {
        if !self.writable {
            return Err(CoreError::misuse(format!(
                "truncate on read-only segment handle {}",
                self.name
            )));
        }

        self.backend.truncate(new_length)?;
        self.last_sync = Instant::now();
        if self.read_pos > new_length {
            self.read_pos = new_length;
        }
        Ok(())
    }

    /// Reads the sequence number of the first event record, restoring the
    /// cursor afterwards.
    ///
    /// Returns `None` when the segment holds no complete record. Used by the
    /// index to recover the true start of a first segment created with an
    /// unknown base.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the first record is not an
    /// event.
    pub fn peek_first_seqno(&mut self) -> CoreResult<Option<Seqno>> {
        let saved = self.read_pos;
        self.read_pos = HEADER_SIZE;
        let outcome = self.read_record(None);
        self.read_pos = saved;

        match outcome? {
            ReadOutcome::Record(record) => {
                let header = record.event_header()?;
                Ok(Some(header.seqno))
            }
            _ => Ok(None),
        }
    }
}
