//! Replication event model.

use serde::{Deserialize, Serialize};

/// One replication event, possibly a fragment of a larger transaction.
///
/// Large transactions are split into fragments that share one sequence
/// number; the final fragment carries `last_frag = true`. Single-fragment
/// transactions use `fragno = 0, last_frag = true`.
///
/// The `payload` is opaque to the log: it is whatever the upstream extractor
/// serialized (row changes, statements). The log persists it byte-for-byte
/// and never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplEvent {
    /// Sequence number of the transaction this event belongs to.
    pub seqno: i64,
    /// Fragment number within the transaction, starting at 0.
    pub fragno: u16,
    /// Whether this is the final fragment of its transaction.
    pub last_frag: bool,
    /// Epoch number of the log at extraction time.
    pub epoch: i64,
    /// Identity of the service that extracted this event.
    pub source_id: String,
    /// Opaque serialized event body.
    pub payload: Vec<u8>,
}

impl ReplEvent {
    /// Creates a single-fragment event.
    #[must_use]
    pub fn new(seqno: i64, source_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            seqno,
            fragno: 0,
            last_frag: true,
            epoch: 0,
            source_id: source_id.into(),
            payload,
        }
    }

    /// Creates one fragment of a multi-fragment transaction.
    #[must_use]
    pub fn fragment(
        seqno: i64,
        fragno: u16,
        last_frag: bool,
        source_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            seqno,
            fragno,
            last_frag,
            epoch: 0,
            source_id: source_id.into(),
            payload,
        }
    }

    /// Sets the epoch number.
    #[must_use]
    pub const fn with_epoch(mut self, epoch: i64) -> Self {
        self.epoch = epoch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_single_fragment() {
        let event = ReplEvent::new(42, "alpha", vec![1, 2, 3]);
        assert_eq!(event.seqno, 42);
        assert_eq!(event.fragno, 0);
        assert!(event.last_frag);
    }

    #[test]
    fn fragment_constructor() {
        let event = ReplEvent::fragment(7, 3, false, "alpha", vec![]);
        assert_eq!(event.fragno, 3);
        assert!(!event.last_frag);
    }

    #[test]
    fn with_epoch() {
        let event = ReplEvent::new(1, "alpha", vec![]).with_epoch(9);
        assert_eq!(event.epoch, 9);
    }
}
