//! # Relog Codec
//!
//! Replication event model and pluggable event codec for Relog.
//!
//! The transaction history log stores [`ReplEvent`]s but never interprets
//! their payloads; the [`EventCodec`] trait is the seam where the event wire
//! format is injected. [`CborCodec`] is the default implementation.
//!
//! ## Usage
//!
//! ```
//! use relog_codec::{CborCodec, EventCodec, ReplEvent};
//!
//! let codec = CborCodec::new();
//! let event = ReplEvent::new(1, "db1", b"row image".to_vec());
//!
//! let bytes = codec.encode(&event).unwrap();
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(event, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod event;

pub use codec::{CborCodec, EventCodec};
pub use error::{CodecError, CodecResult};
pub use event::ReplEvent;
