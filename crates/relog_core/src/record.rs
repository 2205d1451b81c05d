//! Binary log records.
//!
//! One record is the unit of storage in a segment file:
//!
//! ```text
//! | length (4, BE) | payload (N) | crc_kind (1) | crc (8, BE) |
//! ```
//!
//! The length field counts the *whole* record including itself, so
//! `length == N + 13`. The first payload byte is a tag: 0x01 for an event
//! record (thin event header + opaque codec bytes), 0x02 for a rotation
//! marker naming the successor segment.
//!
//! ## Read Outcomes
//!
//! Reads distinguish four conditions as values, never errors:
//!
//! - `Record` - a complete record was parsed
//! - `Empty` - no wait was requested and zero bytes were available
//! - `Truncated` - a partial or implausible record sits at the read position
//!   (an interrupted write, or a corrupt length/crc-kind field); whether that
//!   is repairable is the orchestrator's call, because it depends on context
//!   the record layer doesn't have (recovery vs. live read, writable vs.
//!   read-only)
//! - `TimedOut` - a wait was requested and the deadline passed before the
//!   record was complete

use crate::error::{CoreError, CoreResult};
use crate::types::Seqno;
use relog_storage::StorageBackend;
use std::time::{Duration, Instant};

/// Size of the length prefix.
const LENGTH_SIZE: usize = 4;

/// Fixed overhead of a record: length (4) + crc_kind (1) + crc (8).
pub const RECORD_OVERHEAD: usize = 13;

/// Smallest well-formed length field value (an empty payload).
pub const MIN_RECORD_LENGTH: i32 = RECORD_OVERHEAD as i32;

/// Largest plausible length field value; anything above this is treated as
/// corruption rather than an allocation request.
pub const MAX_RECORD_LENGTH: i32 = 1_000_000_000;

/// Tag byte of an event record.
pub const TAG_EVENT: u8 = 0x01;

/// Tag byte of a rotation marker.
pub const TAG_ROTATE: u8 = 0x02;

/// Size of the thin event header: tag (1) + seqno (8) + fragno (2) +
/// last_frag (1).
pub const EVENT_HEADER_SIZE: usize = 12;

/// Interval at which a blocking read re-polls the segment for growth.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Checksum algorithm applied to a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrcKind {
    /// No checksum stored.
    None = 0,
    /// CRC-32 over the payload.
    Crc32 = 1,
}

impl CrcKind {
    /// Converts a byte to a checksum kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            _ => None,
        }
    }

    /// Converts the checksum kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Thin header at the front of every event payload.
///
/// Carries just enough metadata to scan the log by position without
/// invoking the event codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Sequence number of the transaction.
    pub seqno: Seqno,
    /// Fragment number within the transaction.
    pub fragno: u16,
    /// Whether this fragment completes its transaction.
    pub last_frag: bool,
}

impl EventHeader {
    /// Parses the thin header from an event payload (tag byte included).
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short or not an event record.
    pub fn parse(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < EVENT_HEADER_SIZE {
            return Err(CoreError::invalid_format("event payload too short"));
        }
        if payload[0] != TAG_EVENT {
            return Err(CoreError::invalid_format(format!(
                "expected event tag, found 0x{:02x}",
                payload[0]
            )));
        }

        let seqno = i64::from_be_bytes([
            payload[1], payload[2], payload[3], payload[4], payload[5], payload[6], payload[7],
            payload[8],
        ]);
        let fragno = u16::from_be_bytes([payload[9], payload[10]]);
        let last_frag = payload[11] != 0;

        Ok(Self {
            seqno: Seqno::new(seqno),
            fragno,
            last_frag,
        })
    }
}

/// Outcome of reading one record from a segment.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record.
    Record(LogRecord),
    /// No wait requested and nothing available at the read position.
    Empty,
    /// A partial or implausible record at the read position.
    Truncated,
    /// The wait deadline passed before a complete record appeared.
    TimedOut,
}

/// One length-prefixed, checksummed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Byte offset of the record within its segment file.
    pub offset: u64,
    /// Record payload (tag byte first).
    pub payload: Vec<u8>,
    /// Checksum algorithm used.
    pub crc_kind: CrcKind,
    /// Stored checksum value.
    pub crc: u64,
}

impl LogRecord {
    /// Builds a record around a raw payload, computing the checksum if
    /// requested.
    #[must_use]
    pub fn from_payload(payload: Vec<u8>, crc_enabled: bool) -> Self {
        let (crc_kind, crc) = if crc_enabled {
            (CrcKind::Crc32, u64::from(compute_crc32(&payload)))
        } else {
            (CrcKind::None, 0)
        };

        Self {
            offset: 0,
            payload,
            crc_kind,
            crc,
        }
    }

    /// Builds an event record: thin header followed by opaque codec bytes.
    #[must_use]
    pub fn event(header: &EventHeader, body: &[u8], crc_enabled: bool) -> Self {
        let mut payload = Vec::with_capacity(EVENT_HEADER_SIZE + body.len());
        payload.push(TAG_EVENT);
        payload.extend_from_slice(&header.seqno.as_i64().to_be_bytes());
        payload.extend_from_slice(&header.fragno.to_be_bytes());
        payload.push(u8::from(header.last_frag));
        payload.extend_from_slice(body);
        Self::from_payload(payload, crc_enabled)
    }

    /// Builds a rotation marker naming the successor segment's index.
    #[must_use]
    pub fn rotate(next_index: u32, crc_enabled: bool) -> Self {
        let mut payload = Vec::with_capacity(9);
        payload.push(TAG_ROTATE);
        payload.extend_from_slice(&i64::from(next_index).to_be_bytes());
        Self::from_payload(payload, crc_enabled)
    }

    /// Returns the record tag (first payload byte).
    #[must_use]
    pub fn tag(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Parses the thin event header.
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a well-formed event record.
    pub fn event_header(&self) -> CoreResult<EventHeader> {
        EventHeader::parse(&self.payload)
    }

    /// Returns the opaque codec bytes of an event record.
    #[must_use]
    pub fn event_body(&self) -> &[u8] {
        &self.payload[EVENT_HEADER_SIZE.min(self.payload.len())..]
    }

    /// Parses the successor segment index out of a rotation marker.
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a well-formed rotation record.
    pub fn rotate_target(&self) -> CoreResult<u32> {
        if self.payload.len() < 9 || self.payload[0] != TAG_ROTATE {
            return Err(CoreError::invalid_format("malformed rotation record"));
        }
        let index = i64::from_be_bytes([
            self.payload[1],
            self.payload[2],
            self.payload[3],
            self.payload[4],
            self.payload[5],
            self.payload[6],
            self.payload[7],
            self.payload[8],
        ]);
        u32::try_from(index)
            .map_err(|_| CoreError::invalid_format("rotation target out of range"))
    }

    /// Verifies the stored checksum against the payload.
    ///
    /// A record without a checksum always verifies.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] when the stored and computed
    /// values disagree.
    pub fn verify_crc(&self) -> CoreResult<()> {
        if self.crc_kind == CrcKind::None {
            return Ok(());
        }
        let actual = u64::from(compute_crc32(&self.payload));
        if actual != self.crc {
            return Err(CoreError::ChecksumMismatch {
                expected: self.crc,
                actual,
            });
        }
        Ok(())
    }

    /// Returns the on-disk size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.payload.len() + RECORD_OVERHEAD
    }

    /// Encodes the record to its on-disk form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let total = self.encoded_size();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as i32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.push(self.crc_kind.as_byte());
        buf.extend_from_slice(&self.crc.to_be_bytes());
        buf
    }

    /// Reads one record from `backend` at `offset`.
    ///
    /// With `wait = None` this never blocks: zero available bytes yield
    /// [`ReadOutcome::Empty`], a partial record yields
    /// [`ReadOutcome::Truncated`]. With `wait = Some(d)` the read polls the
    /// backend for growth until the record is complete or the deadline
    /// passes, yielding [`ReadOutcome::TimedOut`] in the latter case.
    ///
    /// A length field outside `[MIN_RECORD_LENGTH, MAX_RECORD_LENGTH]` or an
    /// unknown crc-kind byte yields [`ReadOutcome::Truncated`] in either
    /// mode - no amount of waiting fixes those bytes.
    ///
    /// # Errors
    ///
    /// Only genuine I/O failures are errors; all format conditions surface
    /// through the outcome.
    pub fn read_from(
        backend: &dyn StorageBackend,
        offset: u64,
        wait: Option<Duration>,
    ) -> CoreResult<ReadOutcome> {
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            let size = backend.size()?;
            let available = size.saturating_sub(offset);

            // Outcome to report if no further bytes ever arrive.
            let stalled = if available == 0 {
                ReadOutcome::Empty
            } else if available < LENGTH_SIZE as u64 {
                ReadOutcome::Truncated
            } else {
                match Self::read_at_tolerant(backend, offset, LENGTH_SIZE)? {
                    // The store shrank between size() and read (a concurrent
                    // truncation); report what is there now.
                    None => ReadOutcome::Truncated,
                    Some(len_bytes) => {
                        let declared = i32::from_be_bytes([
                            len_bytes[0],
                            len_bytes[1],
                            len_bytes[2],
                            len_bytes[3],
                        ]);

                        if !(MIN_RECORD_LENGTH..=MAX_RECORD_LENGTH).contains(&declared) {
                            return Ok(ReadOutcome::Truncated);
                        }

                        let total = declared as usize;
                        if available >= total as u64 {
                            return Self::parse_complete(backend, offset, total);
                        }
                        ReadOutcome::Truncated
                    }
                }
            };

            let Some(d) = deadline else {
                return Ok(stalled);
            };

            let now = Instant::now();
            if now >= d {
                return Ok(ReadOutcome::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL.min(d - now));
        }
    }

    /// Reads bytes, absorbing the store shrinking underneath the read.
    fn read_at_tolerant(
        backend: &dyn StorageBackend,
        offset: u64,
        len: usize,
    ) -> CoreResult<Option<Vec<u8>>> {
        match backend.read_at(offset, len) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(relog_storage::StorageError::ReadPastEnd { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses a record known to be fully present.
    fn parse_complete(
        backend: &dyn StorageBackend,
        offset: u64,
        total: usize,
    ) -> CoreResult<ReadOutcome> {
        let Some(buf) = Self::read_at_tolerant(backend, offset, total)? else {
            return Ok(ReadOutcome::Truncated);
        };
        let payload_len = total - RECORD_OVERHEAD;
        let payload = buf[LENGTH_SIZE..LENGTH_SIZE + payload_len].to_vec();

        let kind_byte = buf[LENGTH_SIZE + payload_len];
        let Some(crc_kind) = CrcKind::from_byte(kind_byte) else {
            return Ok(ReadOutcome::Truncated);
        };

        let crc_start = LENGTH_SIZE + payload_len + 1;
        let crc = u64::from_be_bytes([
            buf[crc_start],
            buf[crc_start + 1],
            buf[crc_start + 2],
            buf[crc_start + 3],
            buf[crc_start + 4],
            buf[crc_start + 5],
            buf[crc_start + 6],
            buf[crc_start + 7],
        ]);

        Ok(ReadOutcome::Record(LogRecord {
            offset,
            payload,
            crc_kind,
            crc,
        }))
    }
}

/// CRC-32 lookup table (IEEE polynomial, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the CRC-32 checksum of the given data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
