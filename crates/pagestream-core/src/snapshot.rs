//! Stream Snapshots
//!
//! A snapshot is the materialized state of a stream at some revision, stored
//! in a sibling blob so readers can skip replaying old commits. Only the
//! latest snapshot per stream is retained.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Latest materialized state of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub bucket_id: String,
    pub stream_id: String,

    /// Stream revision this snapshot covers.
    pub stream_revision: u32,

    /// Opaque state body, serialized by the caller.
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serde_roundtrip() {
        let snapshot = Snapshot {
            bucket_id: "b".to_string(),
            stream_id: "s1".to_string(),
            stream_revision: 5,
            payload: Bytes::from("P"),
        };
        let json = serde_json::to_vec(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_slice(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
