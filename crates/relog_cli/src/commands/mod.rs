//! Command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use relog_codec::CborCodec;
use relog_core::{Log, LogConfig};
use std::path::Path;
use std::sync::Arc;

/// Opens the log as a read-only observer.
///
/// Observer mode never takes the write lock, so the tools work on a live
/// log another process is writing.
pub fn open_observer(path: &Path) -> Result<Log, Box<dyn std::error::Error>> {
    let config = LogConfig::new(path).read_only(true).create_if_missing(false);
    let log = Log::prepare(config, Arc::new(CborCodec::new()))?;
    tracing::debug!(path = %path.display(), segments = log.segments().len(), "log opened");
    Ok(log)
}
