//! The log orchestrator.
//!
//! [`Log`] ties the lower layers together into the public surface of the
//! transaction history log: `store` appends events on the write side,
//! `find` serves tailing readers, `delete` trims the ends, and `prepare`
//! (the constructor) runs crash recovery.
//!
//! ## Recovery Policy
//!
//! Recovery scans the *last* segment with non-blocking reads. Damage at the
//! tail of a writable log - a partial record, a checksum mismatch, a
//! transaction missing its final fragment - is repaired by truncating back
//! to the last completed transaction. The same damage on a read-only log is
//! only warned about: observers never mutate another process's files.
//! Damage that waiting cannot explain (an unknown record tag) is a fatal
//! consistency error wherever it appears.

use crate::config::LogConfig;
use crate::connection::{Checkout, ConnectionTable, LogConnection};
use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult};
use crate::index::SegmentIndex;
use crate::record::{EventHeader, LogRecord, ReadOutcome, TAG_EVENT, TAG_ROTATE};
use crate::segment::{SegmentFile, HEADER_SIZE};
use crate::types::{ClientId, Seqno};
use parking_lot::Mutex;
use relog_codec::{EventCodec, ReplEvent};
use relog_storage::{FileBackend, StorageError};
use std::sync::Arc;

/// Outcome of a positioned read.
///
/// The three "absent" flavors are deliberately distinct: `BelowHorizon`
/// events are gone for good, `TimedOut` events may arrive with the next
/// append, and `Skipped` events were never stored at this position.
#[derive(Debug)]
pub enum FindOutcome {
    /// The requested event.
    Found(ReplEvent),
    /// The seqno is below the log's minimum; it will never appear.
    BelowHorizon,
    /// The scan passed the requested position without seeing it - the
    /// upstream writer never stored that (seqno, fragno).
    Skipped,
    /// Nothing new appeared within the configured read timeout.
    TimedOut,
}

impl FindOutcome {
    /// Collapses the outcome to the event, discarding why it was absent.
    #[must_use]
    pub fn found(self) -> Option<ReplEvent> {
        match self {
            Self::Found(event) => Some(event),
            _ => None,
        }
    }
}

/// Cursor for the offline single-file scan API.
///
/// Obtained from [`Log::open_file`]; fed to [`Log::read_next_event`].
#[derive(Debug)]
pub struct SegmentScanner {
    segment: SegmentFile,
}

impl SegmentScanner {
    /// Returns the name of the file being scanned.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.segment.name()
    }

    /// Returns the base sequence number from the file header.
    #[must_use]
    pub fn base_seqno(&self) -> Seqno {
        self.segment.base_seqno()
    }

    /// Reads the next raw record without interpreting it.
    ///
    /// Low-level access for integrity tooling that wants to see rotation
    /// markers and damaged tails rather than have them smoothed over.
    ///
    /// # Errors
    ///
    /// Returns an error only on I/O failure.
    pub fn next_record(&mut self) -> CoreResult<ReadOutcome> {
        self.segment.read_record(None)
    }
}

/// Mutable state owned by the single writer.
#[derive(Debug)]
struct WriterState {
    /// The writer's cursor identity in the connection table.
    client: ClientId,
    /// Index the next created segment file will carry.
    next_file_index: u32,
    /// Set when the active segment crossed the rotation threshold on a
    /// transaction boundary; consumed at the next fragment-zero store.
    rotate_pending: bool,
}

/// What the recovery scan of the last segment concluded.
#[derive(Debug)]
struct Recovery {
    /// Highest sequence number with a complete transaction.
    max_seqno: Seqno,
    /// Successor index from a trailing rotation marker whose segment was
    /// never created (crash mid-rotation).
    pending_rotation: Option<u32>,
}

/// The transaction history log.
///
/// One instance per log directory, shared across the writer thread and any
/// number of reader threads. Readers identify themselves with a
/// [`ClientId`] from [`Log::connect`] and get a private cursor each.
pub struct Log {
    config: LogConfig,
    dir: LogDir,
    codec: Arc<dyn EventCodec>,
    index: SegmentIndex,
    connections: ConnectionTable,
    writer: Mutex<WriterState>,
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("dir", &self.dir.path())
            .field("writable", &self.writable())
            .field("segments", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl Log {
    /// Opens the log: takes (or fails to take) the write lock, catalogs the
    /// segments, and runs crash recovery on the tail.
    ///
    /// Failing to acquire the write lock is not an error - the log opens as
    /// a read-only observer, since replicas routinely tail files another
    /// process writes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, an invalid segment header, or
    /// unrepairable corruption.
    pub fn prepare(config: LogConfig, codec: Arc<dyn EventCodec>) -> CoreResult<Log> {
        let dir = LogDir::open(&config.log_dir, config.read_only, config.create_if_missing)?;
        let writable = dir.writable() && !config.read_only;

        // A crash between successor creation and header write leaves a stub
        // shorter than the header. Remove it; the predecessor's rotation
        // marker makes recovery recreate the file properly.
        if writable {
            let files = dir.list_segment_files()?;
            if let Some(name) = files.last() {
                if std::fs::metadata(dir.file_path(name))?.len() < HEADER_SIZE {
                    tracing::warn!(file = %name, "removing headerless segment stub");
                    dir.delete_segment_file(name)?;
                }
            }
        }

        let index = SegmentIndex::new(config.retention);
        index.build(&dir)?;

        let log = Log {
            connections: ConnectionTable::new(config.idle_lease_timeout),
            writer: Mutex::new(WriterState {
                client: ClientId::new(0), // assigned below
                next_file_index: 1,
                rotate_pending: false,
            }),
            config,
            dir,
            codec,
            index,
        };

        if log.index.is_empty() && writable {
            let name = LogDir::data_file_name(1);
            let segment = log.open_segment_write(&name, Seqno::UNKNOWN)?;
            drop(segment);
            log.index.add_new_file(&log.dir, Seqno::UNKNOWN, &name)?;
            log.dir.sync_directory()?;
        }

        if let Some(last) = log.index.last_file() {
            let recovery = log.recover_tail(&last, writable)?;

            if let Some(next_index) = recovery.pending_rotation {
                if writable {
                    let base = if recovery.max_seqno.is_unknown() {
                        Seqno::UNKNOWN
                    } else {
                        recovery.max_seqno.next()
                    };
                    let name = LogDir::data_file_name(next_index);
                    tracing::warn!(
                        file = %name,
                        "previous shutdown crashed mid-rotation; creating successor segment"
                    );
                    let segment = log.open_segment_write(&name, base)?;
                    drop(segment);
                    log.index.add_new_file(&log.dir, base, &name)?;
                    log.dir.sync_directory()?;
                } else {
                    tracing::warn!(
                        "log ends with a rotation marker and no successor; \
                         read-only observer cannot repair it"
                    );
                }
            }

            log.index.set_max_indexed_seqno(recovery.max_seqno);
        }

        {
            let mut writer = log.writer.lock();
            writer.client = log.connections.connect();
            writer.next_file_index = log
                .index
                .last_file()
                .and_then(|name| LogDir::parse_file_index(&name))
                .map_or(1, |index| index + 1);
        }

        tracing::info!(
            dir = %log.dir.path().display(),
            writable,
            segments = log.index.len(),
            max_seqno = ?log.max_seqno(),
            "log prepared"
        );

        Ok(log)
    }

    /// Scans the last segment from its start and repairs tail damage when
    /// writable.
    fn recover_tail(&self, file_name: &str, writable: bool) -> CoreResult<Recovery> {
        let entries = self.index.entries();
        let last_entry_start = entries.last().map_or(Seqno::UNKNOWN, |e| e.start_seqno);

        // Everything before the last segment is sealed and complete, so the
        // scan starts from the range the catalog already vouches for.
        let mut max_seqno = if entries.len() >= 2 && !last_entry_start.is_unknown() {
            last_entry_start.prev()
        } else {
            Seqno::UNKNOWN
        };

        let mut segment = if writable {
            self.open_segment_write(file_name, Seqno::UNKNOWN)?
        } else {
            self.open_segment_read(file_name)?
        };
        segment.seek_to_start();

        // Offset just past the last complete transaction.
        let mut boundary = HEADER_SIZE;
        let mut open_fragments = false;
        let mut pending_rotation = None;

        loop {
            let record_start = segment.read_pos();
            match segment.read_record(None)? {
                ReadOutcome::Empty => break,
                ReadOutcome::TimedOut => break, // unreachable without a wait
                ReadOutcome::Truncated => {
                    let cut = if open_fragments { boundary } else { record_start };
                    self.repair_tail(&mut segment, cut, writable, "partial record")?;
                    open_fragments = false;
                    break;
                }
                ReadOutcome::Record(record) => {
                    if record.verify_crc().is_err() {
                        let cut = if open_fragments { boundary } else { record.offset };
                        self.repair_tail(&mut segment, cut, writable, "checksum mismatch")?;
                        open_fragments = false;
                        break;
                    }

                    if pending_rotation.is_some() {
                        return Err(CoreError::corruption(
                            file_name,
                            record.offset,
                            "record follows a rotation marker",
                        ));
                    }

                    match record.tag() {
                        Some(TAG_EVENT) => {
                            let header = record.event_header().map_err(|_| {
                                CoreError::corruption(
                                    file_name,
                                    record.offset,
                                    "malformed event header",
                                )
                            })?;
                            if header.last_frag {
                                max_seqno = header.seqno;
                                boundary = segment.read_pos();
                                open_fragments = false;
                            } else {
                                open_fragments = true;
                            }
                        }
                        Some(TAG_ROTATE) => {
                            let target = record.rotate_target().map_err(|_| {
                                CoreError::corruption(
                                    file_name,
                                    record.offset,
                                    "malformed rotation marker",
                                )
                            })?;
                            pending_rotation = Some(target);
                        }
                        tag => {
                            return Err(CoreError::corruption(
                                file_name,
                                record.offset,
                                format!("unrecognized record tag {tag:?}"),
                            ));
                        }
                    }
                }
            }
        }

        // A transaction whose final fragment never made it to disk.
        if open_fragments {
            self.repair_tail(&mut segment, boundary, writable, "incomplete transaction")?;
        }

        Ok(Recovery {
            max_seqno,
            pending_rotation,
        })
    }

    /// Truncates the scanned segment back to `cut` when writable; warns
    /// either way.
    fn repair_tail(
        &self,
        segment: &mut SegmentFile,
        cut: u64,
        writable: bool,
        reason: &str,
    ) -> CoreResult<()> {
        if writable {
            tracing::warn!(
                file = segment.name(),
                offset = cut,
                reason,
                "repairing damaged log tail by truncation"
            );
            segment.set_length(cut)?;
        } else {
            tracing::warn!(
                file = segment.name(),
                offset = cut,
                reason,
                "damaged log tail on read-only log; leaving as-is"
            );
        }
        Ok(())
    }

    /// Whether this instance may mutate the log.
    #[must_use]
    pub fn writable(&self) -> bool {
        self.dir.writable() && !self.config.read_only
    }

    /// Issues a reader identity for use with [`Log::find`].
    pub fn connect(&self) -> ClientId {
        self.connections.connect()
    }

    /// Returns the lowest sequence number still in the log.
    #[must_use]
    pub fn min_seqno(&self) -> Option<i64> {
        self.index.min_seqno().map(Seqno::as_i64)
    }

    /// Returns the highest stored sequence number.
    #[must_use]
    pub fn max_seqno(&self) -> Option<i64> {
        self.index.max_seqno().map(Seqno::as_i64)
    }

    /// Checks catalog integrity: all files present, sequence ranges
    /// contiguous.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn validate(&self) -> CoreResult<()> {
        self.index.validate(&self.dir)
    }

    /// Appends one event to the log.
    ///
    /// Rotation happens here: when the active segment crossed the size
    /// threshold on a transaction boundary, the *next* fragment-zero store
    /// writes a rotation marker and opens a successor segment, so a
    /// multi-fragment transaction is never split across files.
    ///
    /// `commit = true` forces an fsync before returning - the durability
    /// hook callers use when acknowledging upstream.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] on an observer log; otherwise only
    /// I/O and codec failures. The writer cursor is returned to the table
    /// even when the append fails.
    pub fn store(&self, event: &ReplEvent, commit: bool) -> CoreResult<()> {
        if !self.writable() {
            return Err(CoreError::ReadOnly);
        }

        let mut writer = self.writer.lock();
        let seqno = Seqno::new(event.seqno);

        if self.index.is_empty() {
            let name = LogDir::data_file_name(writer.next_file_index);
            let segment = self.open_segment_write(&name, seqno)?;
            drop(segment);
            self.index.add_new_file(&self.dir, seqno, &name)?;
            self.dir.sync_directory()?;
            writer.next_file_index += 1;
        }

        let mut conn = match self.connections.checkout(writer.client, seqno)? {
            Checkout::Hit(conn) => conn,
            Checkout::Miss => {
                let name = self
                    .index
                    .last_file()
                    .ok_or_else(|| CoreError::invalid_format("no active segment"))?;
                let segment = self.open_segment_write(&name, seqno)?;
                self.connections.install(writer.client)?;
                LogConnection {
                    segment,
                    last_seqno: seqno.prev(),
                }
            }
        };

        let client = writer.client;
        let result = self.store_inner(&mut writer, &mut conn, event, commit);
        if result.is_ok() {
            conn.last_seqno = seqno;
        }
        self.connections.checkin(client, conn);
        result
    }

    /// The append path proper; split out so the cursor is returned on every
    /// exit.
    fn store_inner(
        &self,
        writer: &mut WriterState,
        conn: &mut LogConnection,
        event: &ReplEvent,
        commit: bool,
    ) -> CoreResult<()> {
        let seqno = Seqno::new(event.seqno);
        let threshold = self.config.rotation_threshold.max(HEADER_SIZE);

        let oversized = writer.rotate_pending || conn.segment.size()? > threshold;
        if oversized && event.fragno == 0 && conn.segment.size()? > HEADER_SIZE {
            let next_index = writer.next_file_index;
            let marker = LogRecord::rotate(next_index, self.config.crc_enabled);
            conn.segment.write_record(&marker, u64::MAX, false)?;
            conn.segment.sync()?;

            let name = LogDir::data_file_name(next_index);
            let successor = self.open_segment_write(&name, seqno)?;
            self.index.add_new_file(&self.dir, seqno, &name)?;
            self.dir.sync_directory()?;

            tracing::info!(
                from = conn.segment.name(),
                to = %name,
                at = %seqno,
                "rotated to new segment"
            );

            conn.segment = successor;
            writer.next_file_index += 1;
            writer.rotate_pending = false;
        }

        let header = EventHeader {
            seqno,
            fragno: event.fragno,
            last_frag: event.last_frag,
        };
        let body = self.codec.encode(event)?;
        let record = LogRecord::event(&header, &body, self.config.crc_enabled);

        let crossed = conn
            .segment
            .write_record(&record, threshold, event.last_frag)?;
        if crossed {
            writer.rotate_pending = true;
        }

        self.index.set_max_indexed_seqno(seqno);

        if commit {
            conn.segment.sync()?;
        }

        Ok(())
    }

    /// Fetches the event at `(seqno, fragno)`, blocking up to the configured
    /// read timeout when the position is just past the end of the log.
    ///
    /// A seqno below the log minimum reports [`FindOutcome::BelowHorizon`]
    /// immediately, without blocking. Rotation markers are followed
    /// transparently across segment boundaries.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or on corruption encountered
    /// mid-scan (unknown tag, checksum mismatch); live readers never repair.
    pub fn find(&self, client: ClientId, seqno: i64, fragno: u16) -> CoreResult<FindOutcome> {
        let target = Seqno::new(seqno);

        if let Some(min) = self.index.min_seqno() {
            if target < min {
                return Ok(FindOutcome::BelowHorizon);
            }
        }

        let mut conn = match self.connections.checkout(client, target)? {
            Checkout::Hit(conn) => conn,
            Checkout::Miss => {
                let Some(name) = self.index.file_for(target) else {
                    // Either below a freshly-established minimum or an
                    // entirely empty log; nothing to wait on in either case.
                    return if self.index.is_empty() {
                        Ok(FindOutcome::TimedOut)
                    } else {
                        Ok(FindOutcome::BelowHorizon)
                    };
                };
                let segment = self.open_segment_read(&name)?;
                let last_seqno = if segment.base_seqno().is_unknown() {
                    Seqno::UNKNOWN
                } else {
                    segment.base_seqno().prev()
                };
                self.connections.install(client)?;
                LogConnection {
                    segment,
                    last_seqno,
                }
            }
        };

        let result = self.find_inner(&mut conn, target, fragno);
        if let Ok(FindOutcome::Found(_)) = result {
            conn.last_seqno = target;
        }
        self.connections.checkin(client, conn);
        result
    }

    /// The scan loop; split out so the cursor is returned on every exit.
    fn find_inner(
        &self,
        conn: &mut LogConnection,
        target: Seqno,
        fragno: u16,
    ) -> CoreResult<FindOutcome> {
        loop {
            match conn.segment.read_record(Some(self.config.read_timeout))? {
                ReadOutcome::TimedOut | ReadOutcome::Empty => {
                    return Ok(FindOutcome::TimedOut);
                }
                ReadOutcome::Truncated => {
                    // A partial or implausible record at the live tail: the
                    // writer may be mid-append, or recovery hasn't run yet.
                    // Either way it is absent-for-now from where we sit.
                    return Ok(FindOutcome::TimedOut);
                }
                ReadOutcome::Record(record) => {
                    if let Err(CoreError::ChecksumMismatch { expected, actual }) =
                        record.verify_crc()
                    {
                        return Err(CoreError::corruption(
                            conn.segment.name(),
                            record.offset,
                            format!(
                                "checksum mismatch: expected {expected:08x}, got {actual:08x}"
                            ),
                        ));
                    }

                    match record.tag() {
                        Some(TAG_EVENT) => {
                            let header = record.event_header().map_err(|_| {
                                CoreError::corruption(
                                    conn.segment.name(),
                                    record.offset,
                                    "malformed event header",
                                )
                            })?;

                            let past_target = header.seqno > target
                                || (header.seqno == target && header.fragno > fragno);
                            if past_target {
                                // Leave the cursor on this record so the next
                                // find can still serve it.
                                conn.segment.seek_to(record.offset);
                                return Ok(FindOutcome::Skipped);
                            }

                            if header.seqno == target && header.fragno == fragno {
                                let event = self.codec.decode(record.event_body())?;
                                return Ok(FindOutcome::Found(event));
                            }
                            // Before the target: keep scanning.
                        }
                        Some(TAG_ROTATE) => {
                            let next_index = record.rotate_target().map_err(|_| {
                                CoreError::corruption(
                                    conn.segment.name(),
                                    record.offset,
                                    "malformed rotation marker",
                                )
                            })?;
                            let name = LogDir::data_file_name(next_index);
                            match self.open_segment_read(&name) {
                                Ok(segment) => conn.segment = segment,
                                Err(CoreError::Storage(StorageError::Io(e)))
                                    if e.kind() == std::io::ErrorKind::NotFound =>
                                {
                                    // The successor isn't on disk yet (the
                                    // writer is between marker and create, or
                                    // crashed there). Re-read the marker on
                                    // the next attempt.
                                    conn.segment.seek_to(record.offset);
                                    return Ok(FindOutcome::TimedOut);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        tag => {
                            return Err(CoreError::corruption(
                                conn.segment.name(),
                                record.offset,
                                format!("unrecognized record tag {tag:?}"),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Deletes events from one or both ends of the log.
    ///
    /// `None` bounds default to the respective end. Interior ranges are
    /// rejected: carving a hole out of the middle would break the contiguous
    /// sequence space every reader depends on. Segments fully inside the
    /// range are dropped whole; a segment straddling the high-end boundary
    /// is truncated in place to the exact sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] on an observer log and a misuse error
    /// for interior ranges.
    pub fn delete(&self, low: Option<i64>, high: Option<i64>) -> CoreResult<()> {
        if !self.writable() {
            return Err(CoreError::ReadOnly);
        }

        let writer = self.writer.lock();

        let (Some(min), Some(max)) = (self.index.min_seqno(), self.index.max_seqno()) else {
            return Ok(()); // nothing stored, nothing to delete
        };

        let low_bound = low.map_or(min, Seqno::new);
        let high_bound = high.map_or(max, Seqno::new);

        if low_bound > high_bound {
            return Err(CoreError::misuse(format!(
                "delete range is inverted: {low_bound} > {high_bound}"
            )));
        }
        if low_bound != min && high_bound != max {
            return Err(CoreError::misuse(format!(
                "delete range [{low_bound}, {high_bound}] touches neither end \
                 of the log [{min}, {max}]"
            )));
        }

        tracing::info!(low = %low_bound, high = %high_bound, "deleting log range");

        // Parked cursors may reference segments about to disappear; drop
        // them all. Cursors currently on loan keep working on their open
        // handles and re-resolve through the index afterwards.
        self.connections.clear_parked();

        if low_bound == min && high_bound == max {
            for entry in self.index.entries() {
                self.index.remove_entry(&entry.file_name);
                self.dir.delete_segment_file(&entry.file_name)?;
            }
            drop(writer);
            return Ok(());
        }

        if low_bound == min {
            // Trim from the front: drop segments wholly inside the range. A
            // segment straddling the high bound stays intact - records can
            // only be cut from a file's tail, not its head.
            for entry in self.index.entries() {
                if entry.end_seqno.is_unknown() || entry.end_seqno > high_bound {
                    break;
                }
                self.index.remove_entry(&entry.file_name);
                self.dir.delete_segment_file(&entry.file_name)?;
            }
        } else {
            // Trim from the back: drop trailing segments wholly inside the
            // range, then cut the boundary segment at the exact seqno. The
            // boundary segment is always scanned - even when its own events
            // all survive, a trailing rotation marker now points at a
            // deleted successor and has to go.
            for entry in self.index.entries().into_iter().rev() {
                if entry.start_seqno >= low_bound && !entry.start_seqno.is_unknown() {
                    self.index.remove_entry(&entry.file_name);
                    self.dir.delete_segment_file(&entry.file_name)?;
                } else {
                    self.truncate_segment_at(&entry.file_name, low_bound)?;
                    break;
                }
            }
            self.index.set_max_indexed_seqno(low_bound.prev());
        }

        drop(writer);
        Ok(())
    }

    /// Hard-truncates a segment at the first record with `seqno >= bound`.
    fn truncate_segment_at(&self, file_name: &str, bound: Seqno) -> CoreResult<()> {
        let mut segment = self.open_segment_write(file_name, Seqno::UNKNOWN)?;
        segment.seek_to_start();

        loop {
            let record_start = segment.read_pos();
            match segment.read_record(None)? {
                ReadOutcome::Record(record) => match record.tag() {
                    Some(TAG_EVENT) => {
                        let header = record.event_header().map_err(|_| {
                            CoreError::corruption(
                                file_name,
                                record.offset,
                                "malformed event header",
                            )
                        })?;
                        if header.seqno >= bound {
                            segment.set_length(record_start)?;
                            return Ok(());
                        }
                    }
                    Some(TAG_ROTATE) => {
                        // The old successor is gone; cut the marker too.
                        segment.set_length(record_start)?;
                        return Ok(());
                    }
                    tag => {
                        return Err(CoreError::corruption(
                            file_name,
                            record.offset,
                            format!("unrecognized record tag {tag:?}"),
                        ));
                    }
                },
                _ => return Ok(()), // reached the end without crossing bound
            }
        }
    }

    /// Opens a single segment for offline scanning.
    ///
    /// Part of the low-level inspection surface; pairs with
    /// [`Log::read_next_event`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or its header is invalid.
    pub fn open_file(&self, name: &str) -> CoreResult<SegmentScanner> {
        let segment = self.open_segment_read(name)?;
        Ok(SegmentScanner { segment })
    }

    /// Decodes the next event from an offline scan cursor.
    ///
    /// Returns `None` at the end of the file's events - including at a
    /// rotation marker, since the scan is deliberately single-file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, checksum mismatch, or an
    /// unrecognized record tag.
    pub fn read_next_event(&self, scanner: &mut SegmentScanner) -> CoreResult<Option<ReplEvent>> {
        match scanner.next_record()? {
            ReadOutcome::Record(record) => {
                if let Err(CoreError::ChecksumMismatch { expected, actual }) = record.verify_crc()
                {
                    return Err(CoreError::corruption(
                        scanner.file_name(),
                        record.offset,
                        format!("checksum mismatch: expected {expected:08x}, got {actual:08x}"),
                    ));
                }
                match record.tag() {
                    Some(TAG_EVENT) => {
                        let event = self.codec.decode(record.event_body())?;
                        Ok(Some(event))
                    }
                    Some(TAG_ROTATE) => Ok(None),
                    tag => Err(CoreError::corruption(
                        scanner.file_name(),
                        record.offset,
                        format!("unrecognized record tag {tag:?}"),
                    )),
                }
            }
            _ => Ok(None),
        }
    }

    /// Returns a snapshot of the segment catalog.
    #[must_use]
    pub fn segments(&self) -> Vec<crate::index::IndexEntry> {
        self.index.entries()
    }

    /// Releases the log: drains every cursor and fails all later calls
    /// fast.
    ///
    /// A writable log syncs its active segment first so the final appends
    /// are durable.
    pub fn release(&self) {
        if self.writable() {
            if let Some(name) = self.index.last_file() {
                match self.open_segment_write(&name, Seqno::UNKNOWN) {
                    Ok(mut segment) => {
                        if let Err(e) = segment.sync() {
                            tracing::warn!(error = %e, "final sync failed during release");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "could not reopen active segment during release");
                    }
                }
            }
        }
        self.connections.release();
        tracing::info!(dir = %self.dir.path().display(), "log released");
    }

    fn open_segment_write(&self, name: &str, base: Seqno) -> CoreResult<SegmentFile> {
        let backend = FileBackend::open(&self.dir.file_path(name))?;
        SegmentFile::prepare_write(name, Box::new(backend), base, self.config.fsync_interval)
    }

    fn open_segment_read(&self, name: &str) -> CoreResult<SegmentFile> {
        let backend = FileBackend::open_read_only(&self.dir.file_path(name))?;
        SegmentFile::prepare_read(name, Box::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::LogDir;
    use relog_codec::CborCodec;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn config(path: &Path) -> LogConfig {
        LogConfig::new(path).read_timeout(Duration::from_millis(300))
    }

    fn open_log(path: &Path) -> Log {
        Log::prepare(config(path), Arc::new(CborCodec::new())).unwrap()
    }

    fn event(seqno: i64) -> ReplEvent {
        ReplEvent::new(seqno, "svc", vec![seqno as u8; 16])
    }

    fn fragment(seqno: i64, fragno: u16, last: bool) -> ReplEvent {
        ReplEvent::fragment(seqno, fragno, last, "svc", vec![fragno as u8; 40])
    }

    fn last_segment_path(path: &Path) -> std::path::PathBuf {
        let mut names: Vec<String> = std::fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| LogDir::parse_file_index(n).is_some())
            .collect();
        names.sort();
        path.join(names.last().unwrap())
    }

    #[test]
    fn fresh_log_is_empty() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());

        assert!(log.writable());
        assert_eq!(log.min_seqno(), None);
        assert_eq!(log.max_seqno(), None);
        assert_eq!(log.segments().len(), 1);
        log.validate().unwrap();
    }

    #[test]
    fn store_and_find_round_trip() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());

        for seqno in 1..=3 {
            log.store(&event(seqno), seqno == 3).unwrap();
        }

        assert_eq!(log.min_seqno(), Some(1));
        assert_eq!(log.max_seqno(), Some(3));

        let reader = log.connect();
        for seqno in 1..=3 {
            let found = log.find(reader, seqno, 0).unwrap().found().unwrap();
            assert_eq!(found.seqno, seqno);
            assert_eq!(found.payload, vec![seqno as u8; 16]);
        }
    }

    #[test]
    fn store_rejected_on_read_only() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            log.store(&event(1), true).unwrap();
            log.release();
        }

        let observer = Log::prepare(
            config(temp.path()).read_only(true),
            Arc::new(CborCodec::new()),
        )
        .unwrap();
        assert!(!observer.writable());
        assert!(matches!(
            observer.store(&event(2), false),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(
            observer.delete(None, None),
            Err(CoreError::ReadOnly)
        ));

        // Reading still works.
        let reader = observer.connect();
        assert!(observer.find(reader, 1, 0).unwrap().found().is_some());
    }

    #[test]
    fn rotation_scenario_five_events_two_segments() {
        let temp = tempdir().unwrap();
        let log = Log::prepare(
            config(temp.path()).rotation_threshold(150),
            Arc::new(CborCodec::new()),
        )
        .unwrap();

        for seqno in 1..=5 {
            log.store(&event(seqno), true).unwrap();
        }

        assert!(log.segments().len() >= 2, "expected rotation to happen");
        assert_eq!(log.min_seqno(), Some(1));
        assert_eq!(log.max_seqno(), Some(5));
        log.validate().unwrap();

        // Events are reachable regardless of which segment holds them.
        let reader = log.connect();
        for seqno in [3, 1, 5] {
            let found = log.find(reader, seqno, 0).unwrap().found().unwrap();
            assert_eq!(found.seqno, seqno);
        }
    }

    #[test]
    fn multi_fragment_transaction_never_splits() {
        let temp = tempdir().unwrap();
        let log = Log::prepare(
            config(temp.path()).rotation_threshold(100),
            Arc::new(CborCodec::new()),
        )
        .unwrap();

        // Transaction 1 is far larger than the threshold.
        for fragno in 0..3 {
            log.store(&fragment(1, fragno, fragno == 2), false).unwrap();
        }
        // Fragment zero of the next transaction triggers the rotation.
        log.store(&event(2), true).unwrap();

        let segments = log.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].start_seqno, Seqno::new(2));

        // Every fragment of transaction 1 sits in the first file.
        let mut scanner = log.open_file(&segments[0].file_name).unwrap();
        let mut seqnos = Vec::new();
        while let Some(ev) = log.read_next_event(&mut scanner).unwrap() {
            seqnos.push(ev.seqno);
        }
        assert_eq!(seqnos, vec![1, 1, 1]);
    }

    #[test]
    fn fragment_probing() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());

        log.store(&fragment(1, 0, false), false).unwrap();
        log.store(&fragment(1, 1, true), false).unwrap();
        log.store(&event(2), true).unwrap();

        let reader = log.connect();
        assert!(log.find(reader, 1, 0).unwrap().found().is_some());
        assert!(log.find(reader, 1, 1).unwrap().found().is_some());
        // Probing one past the fragment count reports a skip, not a timeout.
        assert!(matches!(
            log.find(reader, 1, 2).unwrap(),
            FindOutcome::Skipped
        ));
        // The skip did not consume the following event.
        assert!(log.find(reader, 2, 0).unwrap().found().is_some());
    }

    #[test]
    fn find_below_minimum_is_immediate() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());

        for seqno in 5..=7 {
            log.store(&event(seqno), false).unwrap();
        }

        let reader = log.connect();
        let start = Instant::now();
        assert!(matches!(
            log.find(reader, 2, 0).unwrap(),
            FindOutcome::BelowHorizon
        ));
        assert!(start.elapsed() < Duration::from_millis(100), "must not block");
    }

    #[test]
    fn find_beyond_maximum_times_out() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());
        log.store(&event(1), true).unwrap();

        let reader = log.connect();
        let start = Instant::now();
        assert!(matches!(
            log.find(reader, 2, 0).unwrap(),
            FindOutcome::TimedOut
        ));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn find_skipped_seqno() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());

        log.store(&event(1), false).unwrap();
        log.store(&event(3), true).unwrap(); // 2 was filtered upstream

        let reader = log.connect();
        assert!(matches!(
            log.find(reader, 2, 0).unwrap(),
            FindOutcome::Skipped
        ));
        // The cursor did not run past event 3.
        assert!(log.find(reader, 3, 0).unwrap().found().is_some());
    }

    #[test]
    fn live_tail_sees_concurrent_store() {
        let temp = tempdir().unwrap();
        let log = Arc::new(
            Log::prepare(
                config(temp.path()).read_timeout(Duration::from_secs(5)),
                Arc::new(CborCodec::new()),
            )
            .unwrap(),
        );

        for seqno in 1..=9 {
            log.store(&event(seqno), false).unwrap();
        }

        let reader = log.connect();
        let tail = Arc::clone(&log);
        let handle = std::thread::spawn(move || tail.find(reader, 10, 0).unwrap());

        std::thread::sleep(Duration::from_millis(150));
        log.store(&event(10), true).unwrap();

        let outcome = handle.join().unwrap();
        let found = outcome.found().expect("tailing reader must see the append");
        assert_eq!(found.seqno, 10);
    }

    #[test]
    fn recovery_truncates_partial_length() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=3 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        // Simulate a crash mid-write: 2 stray bytes of a length prefix.
        let segment = last_segment_path(temp.path());
        let clean_size = std::fs::metadata(&segment).unwrap().len();
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes.extend_from_slice(&[0x00, 0x00]);
        std::fs::write(&segment, &bytes).unwrap();

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(3));
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), clean_size);

        let reader = log.connect();
        assert!(log.find(reader, 3, 0).unwrap().found().is_some());
    }

    #[test]
    fn recovery_truncates_partial_payload() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=2 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        // A full length prefix promising 80 bytes, followed by only 10.
        let segment = last_segment_path(temp.path());
        let clean_size = std::fs::metadata(&segment).unwrap().len();
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes.extend_from_slice(&80_i32.to_be_bytes());
        bytes.extend_from_slice(&[0xAA; 10]);
        std::fs::write(&segment, &bytes).unwrap();

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(2));
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), clean_size);

        // The log accepts new appends after repair.
        log.store(&event(3), true).unwrap();
        assert_eq!(log.max_seqno(), Some(3));
    }

    #[test]
    fn recovery_truncates_bad_crc_tail() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=3 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        // Corrupt the stored checksum of the final record.
        let segment = last_segment_path(temp.path());
        let mut bytes = std::fs::read(&segment).unwrap();
        let len = bytes.len();
        bytes[len - 5] ^= 0xFF;
        std::fs::write(&segment, &bytes).unwrap();

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(2));

        let reader = log.connect();
        assert!(log.find(reader, 2, 0).unwrap().found().is_some());
        assert!(matches!(
            log.find(reader, 3, 0).unwrap(),
            FindOutcome::TimedOut
        ));
    }

    #[test]
    fn recovery_truncates_incomplete_transaction() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            log.store(&event(1), true).unwrap();
            // Transaction 2 never gets its final fragment.
            log.store(&fragment(2, 0, false), false).unwrap();
            log.store(&fragment(2, 1, false), true).unwrap();
            log.release();
        }

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(1));

        // Re-storing transaction 2 lands cleanly after the repair.
        log.store(&event(2), true).unwrap();
        let reader = log.connect();
        let found = log.find(reader, 2, 0).unwrap().found().unwrap();
        assert!(found.last_frag);
    }

    #[test]
    fn recovery_finishes_crashed_rotation() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=2 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        // Crash state: rotation marker written, successor never created.
        let segment = last_segment_path(temp.path());
        let marker = LogRecord::rotate(2, true);
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes.extend_from_slice(&marker.encode());
        std::fs::write(&segment, &bytes).unwrap();

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(2));
        assert_eq!(log.segments().len(), 2);
        log.validate().unwrap();

        // The writer continues into the fresh successor.
        log.store(&event(3), true).unwrap();
        let reader = log.connect();
        assert_eq!(
            log.find(reader, 3, 0).unwrap().found().unwrap().seqno,
            3
        );
    }

    #[test]
    fn recovery_replaces_headerless_successor_stub() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=2 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        // Crash state: rotation marker written, successor created but the
        // crash hit before its header did.
        let segment = last_segment_path(temp.path());
        let marker = LogRecord::rotate(2, true);
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes.extend_from_slice(&marker.encode());
        std::fs::write(&segment, &bytes).unwrap();
        std::fs::write(temp.path().join(LogDir::data_file_name(2)), [0u8; 3]).unwrap();

        let log = open_log(temp.path());
        assert_eq!(log.max_seqno(), Some(2));
        assert_eq!(log.segments().len(), 2);
        log.validate().unwrap();

        log.store(&event(3), true).unwrap();
        let reader = log.connect();
        assert!(log.find(reader, 3, 0).unwrap().found().is_some());
    }

    #[test]
    fn read_only_recovery_leaves_damage_in_place() {
        let temp = tempdir().unwrap();
        {
            let log = open_log(temp.path());
            for seqno in 1..=2 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        let segment = last_segment_path(temp.path());
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes.extend_from_slice(&[0x00, 0x00, 0x00]);
        let damaged_size = bytes.len() as u64;
        std::fs::write(&segment, &bytes).unwrap();

        let observer = Log::prepare(
            config(temp.path()).read_only(true),
            Arc::new(CborCodec::new()),
        )
        .unwrap();
        assert_eq!(observer.max_seqno(), Some(2));
        // No repair happened.
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), damaged_size);
    }

    #[test]
    fn interior_delete_rejected() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());
        for seqno in 1..=6 {
            log.store(&event(seqno), false).unwrap();
        }

        assert!(matches!(
            log.delete(Some(2), Some(4)),
            Err(CoreError::Misuse { .. })
        ));
        assert_eq!(log.min_seqno(), Some(1));
        assert_eq!(log.max_seqno(), Some(6));
    }

    #[test]
    fn delete_from_low_end_drops_whole_segments() {
        let temp = tempdir().unwrap();
        let log = Log::prepare(
            config(temp.path()).rotation_threshold(150),
            Arc::new(CborCodec::new()),
        )
        .unwrap();

        for seqno in 1..=8 {
            log.store(&event(seqno), false).unwrap();
        }
        let before = log.segments();
        assert!(before.len() >= 3);

        // Delete everything the first segment covers.
        let first_end = before[0].end_seqno.as_i64();
        log.delete(None, Some(first_end)).unwrap();

        let after = log.segments();
        assert_eq!(after.len(), before.len() - 1);
        assert_eq!(log.min_seqno(), Some(first_end + 1));
        assert_eq!(log.max_seqno(), Some(8));
        assert!(!temp.path().join(&before[0].file_name).exists());
        log.validate().unwrap();

        let reader = log.connect();
        assert!(matches!(
            log.find(reader, first_end, 0).unwrap(),
            FindOutcome::BelowHorizon
        ));
        assert!(log.find(reader, first_end + 1, 0).unwrap().found().is_some());
    }

    #[test]
    fn delete_from_high_end_truncates_straddler() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());
        for seqno in 1..=5 {
            log.store(&event(seqno), true).unwrap();
        }

        log.delete(Some(4), None).unwrap();
        assert_eq!(log.min_seqno(), Some(1));
        assert_eq!(log.max_seqno(), Some(3));

        let reader = log.connect();
        assert!(log.find(reader, 3, 0).unwrap().found().is_some());
        assert!(matches!(
            log.find(reader, 4, 0).unwrap(),
            FindOutcome::TimedOut
        ));

        // The freed range is appendable again.
        log.store(&event(4), true).unwrap();
        assert_eq!(log.max_seqno(), Some(4));
        assert!(log.find(reader, 4, 0).unwrap().found().is_some());
    }

    #[test]
    fn delete_aligned_with_segment_boundary_trims_rotation_marker() {
        let temp = tempdir().unwrap();
        let log = Log::prepare(
            config(temp.path()).rotation_threshold(150),
            Arc::new(CborCodec::new()),
        )
        .unwrap();
        for seqno in 1..=5 {
            log.store(&event(seqno), true).unwrap();
        }

        let segments = log.segments();
        assert!(segments.len() >= 2);
        let second_start = segments[1].start_seqno.as_i64();

        // Drop everything from the second segment's start: the trailing
        // files disappear whole, and the first file's rotation marker -
        // now pointing at a deleted successor - must disappear with them.
        log.delete(Some(second_start), None).unwrap();
        assert_eq!(log.max_seqno(), Some(second_start - 1));
        log.validate().unwrap();

        // The writer continues in the surviving segment and readers never
        // chase the stale marker.
        log.store(&event(second_start), true).unwrap();
        let reader = log.connect();
        assert!(log.find(reader, second_start, 0).unwrap().found().is_some());
        // Rewinding to an earlier survivor still works.
        assert!(log
            .find(reader, second_start - 1, 0)
            .unwrap()
            .found()
            .is_some());
    }

    #[test]
    fn delete_everything() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());
        for seqno in 1..=4 {
            log.store(&event(seqno), false).unwrap();
        }

        log.delete(None, None).unwrap();
        assert_eq!(log.min_seqno(), None);
        assert_eq!(log.max_seqno(), None);

        // The log restarts cleanly from a fresh segment.
        log.store(&event(100), true).unwrap();
        assert_eq!(log.min_seqno(), Some(100));
        let reader = log.connect();
        assert!(log.find(reader, 100, 0).unwrap().found().is_some());
    }

    #[test]
    fn release_fails_subsequent_calls_fast() {
        let temp = tempdir().unwrap();
        let log = open_log(temp.path());
        log.store(&event(1), true).unwrap();

        let reader = log.connect();
        log.release();

        assert!(matches!(
            log.store(&event(2), false),
            Err(CoreError::LogClosed)
        ));
        assert!(matches!(log.find(reader, 1, 0), Err(CoreError::LogClosed)));
    }

    #[test]
    fn offline_scan_reads_events_and_stops_at_rotation() {
        let temp = tempdir().unwrap();
        let log = Log::prepare(
            config(temp.path()).rotation_threshold(150),
            Arc::new(CborCodec::new()),
        )
        .unwrap();
        for seqno in 1..=5 {
            log.store(&event(seqno), true).unwrap();
        }

        let segments = log.segments();
        let mut scanner = log.open_file(&segments[0].file_name).unwrap();

        let mut seqnos = Vec::new();
        while let Some(ev) = log.read_next_event(&mut scanner).unwrap() {
            seqnos.push(ev.seqno);
        }
        // First file holds a contiguous prefix; the rotation marker ends it.
        assert_eq!(seqnos.first(), Some(&1));
        assert_eq!(
            seqnos.last().copied().unwrap(),
            segments[0].end_seqno.as_i64()
        );
    }

    #[test]
    fn reopen_preserves_log_contents() {
        let temp = tempdir().unwrap();
        {
            let log = Log::prepare(
                config(temp.path()).rotation_threshold(150),
                Arc::new(CborCodec::new()),
            )
            .unwrap();
            for seqno in 1..=5 {
                log.store(&event(seqno), true).unwrap();
            }
            log.release();
        }

        let log = open_log(temp.path());
        assert_eq!(log.min_seqno(), Some(1));
        assert_eq!(log.max_seqno(), Some(5));
        log.validate().unwrap();

        // Appending continues where the log left off.
        log.store(&event(6), true).unwrap();
        let reader = log.connect();
        for seqno in 1..=6 {
            assert!(log.find(reader, seqno, 0).unwrap().found().is_some());
        }
    }
}
