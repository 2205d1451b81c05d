//! Pluggable event codec.

use crate::error::{CodecError, CodecResult};
use crate::event::ReplEvent;

/// Serializes replication events to bytes and back.
///
/// The log treats the encoded form as opaque: it wraps the bytes in its own
/// record envelope and never inspects them. Implementations must be
/// deterministic enough that `decode(encode(e)) == e` for every event `e`;
/// nothing else is required of the wire form, so deployments can substitute
/// their own codec without touching the log.
pub trait EventCodec: Send + Sync {
    /// Encodes an event to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    fn encode(&self, event: &ReplEvent) -> CodecResult<Vec<u8>>;

    /// Decodes an event from bytes previously produced by `encode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoded event.
    fn decode(&self, bytes: &[u8]) -> CodecResult<ReplEvent>;
}

/// The default CBOR event codec.
///
/// Encodes events as CBOR via serde. CBOR keeps the opaque payload as a
/// byte string rather than a base64 detour, which matters for large row
/// batches.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl CborCodec {
    /// Creates a new CBOR codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventCodec for CborCodec {
    fn encode(&self, event: &ReplEvent) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(event, &mut buf)
            .map_err(|e| CodecError::encoding(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<ReplEvent> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))
    }
}
