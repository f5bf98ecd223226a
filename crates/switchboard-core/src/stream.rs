use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AdapterError;
use crate::ids::{InvocationId, StreamId};

/// One unit of continuous output. Sequence numbers start at 1 and increase
/// by exactly one per frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub content_type: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, content_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            content_type: content_type.into(),
            payload: payload.into(),
        }
    }
}

/// Frame producer returned by [`crate::tools::StreamAdapter::open`].
///
/// Not restartable: once `next_frame` yields `Ok(None)` or an error, a fresh
/// `open` is required.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, AdapterError>;

    /// Release the underlying device. Called exactly once by the broker.
    async fn close(&mut self);
}

/// Why a stream ended. Carried by the terminal `StreamClosed` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCloseReason {
    EndOfStream,
    ClientRequested,
    SessionClosed,
    ProtocolViolation,
    AdapterFailure,
    CapabilityRevoked,
}

/// The session's single active stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
    pub stream_id: StreamId,
    pub invocation_id: InvocationId,
    pub tool_name: String,
    pub opened_at: DateTime<Utc>,
}

/// Tracks the expected next sequence number of a stream.
#[derive(Debug)]
pub struct SequenceTracker {
    next: u64,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence` if it is exactly the expected one; otherwise return
    /// the expected value.
    pub fn observe(&mut self, sequence: u64) -> Result<(), u64> {
        if sequence == self.next {
            self.next += 1;
            Ok(())
        } else {
            Err(self.next)
        }
    }

    pub fn delivered(&self) -> u64 {
        self.next - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_accepts_contiguous_sequence() {
        let mut t = SequenceTracker::new();
        for seq in 1..=5 {
            assert!(t.observe(seq).is_ok());
        }
        assert_eq!(t.delivered(), 5);
    }

    #[test]
    fn tracker_rejects_gap() {
        let mut t = SequenceTracker::new();
        t.observe(1).unwrap();
        t.observe(2).unwrap();
        assert_eq!(t.observe(4), Err(3));
        assert_eq!(t.delivered(), 2);
    }

    #[test]
    fn tracker_rejects_reorder_and_zero() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.observe(0), Err(1));
        t.observe(1).unwrap();
        assert_eq!(t.observe(1), Err(2));
    }

    #[test]
    fn close_reason_serde() {
        let json = serde_json::to_string(&StreamCloseReason::ProtocolViolation).unwrap();
        assert_eq!(json, r#""protocol_violation""#);
    }
}
