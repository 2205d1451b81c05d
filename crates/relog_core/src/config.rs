//! Log configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a transaction history log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the segment files.
    pub log_dir: PathBuf,

    /// Whether to create the log directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Segment size beyond which the writer rotates to a new file.
    /// Rotation only ever happens on a transaction boundary.
    pub rotation_threshold: u64,

    /// Whether to checksum record payloads with CRC-32.
    pub crc_enabled: bool,

    /// Age beyond which old segments are purged (`Duration::ZERO` = keep
    /// forever). The two most recent segments are always preserved.
    pub retention: Duration,

    /// Idle time after which an unused client cursor is reclaimed.
    pub idle_lease_timeout: Duration,

    /// How long a blocking read waits for the writer before reporting a
    /// timeout.
    pub read_timeout: Duration,

    /// Minimum interval between fsyncs on the active segment.
    pub fsync_interval: Duration,

    /// Open the log read-only (observer mode). Observers never take the
    /// directory lock and reject `store`/`delete`.
    pub read_only: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("thl"),
            create_if_missing: true,
            rotation_threshold: 100 * 1024 * 1024, // 100 MB
            crc_enabled: true,
            retention: Duration::ZERO, // keep forever
            idle_lease_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(2000),
            fsync_interval: Duration::from_millis(3000),
            read_only: false,
        }
    }
}

impl LogConfig {
    /// Creates a configuration for the given log directory with default
    /// values.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Sets whether to create the log directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the segment rotation threshold in bytes.
    #[must_use]
    pub const fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    /// Sets whether record payloads are checksummed.
    #[must_use]
    pub const fn crc_enabled(mut self, value: bool) -> Self {
        self.crc_enabled = value;
        self
    }

    /// Sets the retention window (`Duration::ZERO` = keep forever).
    #[must_use]
    pub const fn retention(mut self, window: Duration) -> Self {
        self.retention = window;
        self
    }

    /// Sets the idle cursor reclamation timeout.
    #[must_use]
    pub const fn idle_lease_timeout(mut self, timeout: Duration) -> Self {
        self.idle_lease_timeout = timeout;
        self
    }

    /// Sets the blocking-read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the minimum interval between fsyncs on the active segment.
    #[must_use]
    pub const fn fsync_interval(mut self, interval: Duration) -> Self {
        self.fsync_interval = interval;
        self
    }

    /// Opens the log in read-only observer mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }
}
