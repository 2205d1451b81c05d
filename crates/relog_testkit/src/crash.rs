//! Crash and corruption injection.
//!
//! These helpers mutate segment files directly, the way a power cut or bit
//! rot would: torn writes at the tail, flipped bytes in the middle, stray
//! garbage after the last record. Tests pair them with a reopen to verify
//! the recovery policy.

use relog_core::LogDir;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Returns the path of the highest-indexed segment file in a log directory.
///
/// # Panics
///
/// Panics if the directory holds no segment files (test helper).
#[must_use]
pub fn last_segment(log_dir: &Path) -> PathBuf {
    let mut indexed: Vec<(u32, String)> = std::fs::read_dir(log_dir)
        .expect("read log dir")
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().to_string_lossy().into_owned();
            LogDir::parse_file_index(&name).map(|index| (index, name))
        })
        .collect();
    indexed.sort();
    let (_, name) = indexed.last().expect("no segment files").clone();
    log_dir.join(name)
}

/// Cuts `bytes` off the end of a file, simulating a torn write.
///
/// # Panics
///
/// Panics on I/O failure (test helper).
pub fn truncate_tail(file: &Path, bytes: u64) {
    let handle = OpenOptions::new()
        .write(true)
        .open(file)
        .expect("open segment");
    let size = handle.metadata().expect("metadata").len();
    handle
        .set_len(size.saturating_sub(bytes))
        .expect("truncate");
}

/// Truncates a file to an absolute size.
///
/// # Panics
///
/// Panics on I/O failure (test helper).
pub fn truncate_to(file: &Path, size: u64) {
    let handle = OpenOptions::new()
        .write(true)
        .open(file)
        .expect("open segment");
    handle.set_len(size).expect("truncate");
}

/// Appends raw bytes after the last record, simulating a partial append.
///
/// # Panics
///
/// Panics on I/O failure (test helper).
pub fn append_garbage(file: &Path, bytes: &[u8]) {
    let mut handle = OpenOptions::new()
        .append(true)
        .open(file)
        .expect("open segment");
    handle.write_all(bytes).expect("append");
}

/// Flips one byte at `offset_from_end`, simulating bit rot.
///
/// # Panics
///
/// Panics on I/O failure (test helper).
pub fn flip_byte_from_end(file: &Path, offset_from_end: u64) {
    let mut handle = OpenOptions::new()
        .read(true)
        .write(true)
        .open(file)
        .expect("open segment");
    let size = handle.metadata().expect("metadata").len();
    let offset = size
        .checked_sub(offset_from_end)
        .expect("offset beyond file");

    use std::io::Read;
    let mut byte = [0u8];
    handle.seek(SeekFrom::Start(offset)).expect("seek");
    handle.read_exact(&mut byte).expect("read");

    byte[0] ^= 0xFF;
    handle.seek(SeekFrom::Start(offset)).expect("seek");
    handle.write_all(&byte).expect("write");
}

/// Returns the current size of a file.
///
/// # Panics
///
/// Panics on I/O failure (test helper).
#[must_use]
pub fn file_size(file: &Path) -> u64 {
    std::fs::metadata(file).expect("metadata").len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{store_range, TempLog};

    #[test]
    fn torn_write_recovers_to_last_boundary() {
        let fixture = TempLog::new();
        {
            let log = fixture.open().unwrap();
            store_range(&log, 1..=3).unwrap();
            log.release();
        }

        // Cut into the final record.
        let segment = last_segment(fixture.path());
        truncate_tail(&segment, 7);

        let log = fixture.open().unwrap();
        assert_eq!(log.max_seqno(), Some(2));
    }

    #[test]
    fn garbage_after_log_is_discarded() {
        let fixture = TempLog::new();
        {
            let log = fixture.open().unwrap();
            store_range(&log, 1..=2).unwrap();
            log.release();
        }

        let segment = last_segment(fixture.path());
        let clean = file_size(&segment);
        append_garbage(&segment, &[0x00, 0x01, 0x02]);

        let log = fixture.open().unwrap();
        assert_eq!(log.max_seqno(), Some(2));
        assert_eq!(file_size(&segment), clean);
    }

    #[test]
    fn every_torn_write_position_recovers() {
        // Whatever byte the crash tore the final record at, recovery must
        // land exactly on the end of the previous transaction.
        let fixture = TempLog::new();
        let boundary;
        let end;
        {
            let log = fixture.open().unwrap();
            store_range(&log, 1..=2).unwrap();
            boundary = file_size(&last_segment(fixture.path()));
            log.store(&crate::fixtures::event(3), true).unwrap();
            end = file_size(&last_segment(fixture.path()));
            log.release();
        }

        let reference = std::fs::read(last_segment(fixture.path())).unwrap();

        for cut in (boundary + 1)..end {
            let scratch = TempLog::new();
            std::fs::write(
                scratch.path().join(
                    last_segment(fixture.path())
                        .file_name()
                        .unwrap()
                        .to_str()
                        .unwrap(),
                ),
                &reference[..cut as usize],
            )
            .unwrap();

            let log = scratch.open().unwrap();
            assert_eq!(
                log.max_seqno(),
                Some(2),
                "recovery failed for a record torn at byte {cut}"
            );
        }
    }
}
