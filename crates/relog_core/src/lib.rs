//! # Relog Core
//!
//! The transaction history log engine for Relog: a persistent, append-only,
//! single-writer/multi-reader event log underlying a database replication
//! service.
//!
//! Events live in a chain of rotating segment files, indexed by monotonic
//! sequence number. Readers tail the log from any position and block until
//! the writer appends more.
//!
//! ## Layers
//!
//! - [`record`] - length-prefixed, checksummed binary records
//! - [`segment`] - I/O on one segment file (header, blocking reads, append)
//! - [`index`] - in-memory catalog of segments and their seqno ranges
//! - [`connection`] - per-client cursor leases with idle reclamation
//! - [`Log`] - the orchestrator: `store`, `find`, `delete`, recovery
//!
//! ## Example
//!
//! ```no_run
//! use relog_codec::{CborCodec, ReplEvent};
//! use relog_core::{Log, LogConfig};
//! use std::sync::Arc;
//!
//! let config = LogConfig::new("/var/lib/relog/thl");
//! let log = Log::prepare(config, Arc::new(CborCodec::new())).unwrap();
//!
//! log.store(&ReplEvent::new(1, "db1", b"row image".to_vec()), true)
//!     .unwrap();
//!
//! let reader = log.connect();
//! let outcome = log.find(reader, 1, 0).unwrap();
//! assert!(outcome.found().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod dir;
pub mod error;
pub mod index;
pub mod log;
pub mod record;
pub mod segment;
pub mod types;

pub use config::LogConfig;
pub use connection::{Checkout, ConnectionTable, LogConnection};
pub use dir::LogDir;
pub use error::{CoreError, CoreResult};
pub use index::{IndexEntry, SegmentIndex};
pub use log::{FindOutcome, Log, SegmentScanner};
pub use record::{CrcKind, EventHeader, LogRecord, ReadOutcome};
pub use segment::SegmentFile;
pub use types::{ClientId, Seqno};
