//! Temp-directory log fixtures and event generators.

use relog_codec::{CborCodec, ReplEvent};
use relog_core::{CoreResult, Log, LogConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A log rooted in a temporary directory that is removed on drop.
///
/// The fixture only owns the directory; [`TempLog::open`] can be called
/// repeatedly to simulate process restarts, and writable/observer instances
/// can coexist the way a writer and a tailing replica do.
#[derive(Debug)]
pub struct TempLog {
    dir: TempDir,
    config: LogConfig,
}

impl TempLog {
    /// Creates a fixture with test-friendly defaults: a 300 ms read timeout
    /// and no retention.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = LogConfig::new(dir.path()).read_timeout(Duration::from_millis(300));
        Self { dir, config }
    }

    /// Overrides the rotation threshold.
    #[must_use]
    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.config = self.config.rotation_threshold(bytes);
        self
    }

    /// Overrides the blocking-read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.read_timeout(timeout);
        self
    }

    /// Overrides the idle cursor timeout.
    #[must_use]
    pub fn with_idle_lease_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.idle_lease_timeout(timeout);
        self
    }

    /// Overrides the retention window.
    #[must_use]
    pub fn with_retention(mut self, window: Duration) -> Self {
        self.config = self.config.retention(window);
        self
    }

    /// Returns the log directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a writable log instance over the fixture directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `prepare` fails.
    pub fn open(&self) -> CoreResult<Log> {
        Log::prepare(self.config.clone(), Arc::new(CborCodec::new()))
    }

    /// Opens a read-only observer over the fixture directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `prepare` fails.
    pub fn open_observer(&self) -> CoreResult<Log> {
        Log::prepare(
            self.config.clone().read_only(true).create_if_missing(false),
            Arc::new(CborCodec::new()),
        )
    }
}

impl Default for TempLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a single-fragment event with a recognizable payload.
#[must_use]
pub fn event(seqno: i64) -> ReplEvent {
    ReplEvent::new(seqno, "fixture", payload_for(seqno, 0))
}

/// Builds one fragment of a multi-fragment transaction.
#[must_use]
pub fn fragment(seqno: i64, fragno: u16, last_frag: bool) -> ReplEvent {
    ReplEvent::fragment(seqno, fragno, last_frag, "fixture", payload_for(seqno, fragno))
}

/// Deterministic payload bytes for an event position, for later assertion.
#[must_use]
pub fn payload_for(seqno: i64, fragno: u16) -> Vec<u8> {
    let mut payload = seqno.to_be_bytes().to_vec();
    payload.extend_from_slice(&fragno.to_be_bytes());
    payload.extend_from_slice(&[0xAB; 22]);
    payload
}

/// Stores single-fragment transactions for every seqno in the range.
///
/// # Errors
///
/// Returns an error if any store fails.
pub fn store_range(
    log: &Log,
    seqnos: std::ops::RangeInclusive<i64>,
) -> CoreResult<()> {
    for seqno in seqnos {
        log.store(&event(seqno), false)?;
    }
    Ok(())
}
