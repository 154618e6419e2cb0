//! Commit Data Structures
//!
//! A commit is an atomic group of events appended to one aggregate stream.
//!
//! ## Structure
//!
//! Each commit carries:
//! - **bucket_id / stream_id**: which stream it belongs to
//! - **commit_id**: caller-chosen UUID, used for duplicate detection
//! - **commit_sequence**: dense, monotonically increasing per stream (from 1)
//! - **stream_revision**: revision of the *last* event in this commit
//! - **commit_stamp**: caller-provided UTC timestamp
//! - **checkpoint**: globally monotonic ordering number (allocated at commit
//!   time; absent on the attempt)
//! - **headers**: opaque per-commit metadata
//! - **events**: ordered opaque event bodies
//!
//! ## Design Decisions
//!
//! - Event bodies and header values are `bytes::Bytes` - the store never
//!   inspects them, and `Bytes` keeps slicing allocation-free.
//! - The whole [`Commit`] (checkpoint included) is what gets serialized into
//!   the stream blob, so a ranged read plus one deserialize fully
//!   reconstitutes it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A commit as submitted by a caller, before a checkpoint is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAttempt {
    /// Tenant / namespace partition.
    pub bucket_id: String,

    /// Aggregate identity within the bucket.
    pub stream_id: String,

    /// Caller-chosen id; resubmitting the same id is a duplicate.
    pub commit_id: Uuid,

    /// Dense per-stream sequence, starting at 1.
    pub commit_sequence: u32,

    /// Revision of the last event in this commit.
    pub stream_revision: u32,

    /// Caller-provided UTC stamp.
    pub commit_stamp: DateTime<Utc>,

    /// Opaque per-commit metadata.
    pub headers: HashMap<String, Bytes>,

    /// Ordered opaque event bodies.
    pub events: Vec<Bytes>,
}

impl CommitAttempt {
    /// Promote this attempt to a full commit with its allocated checkpoint.
    pub fn into_commit(self, checkpoint: u64) -> Commit {
        Commit {
            bucket_id: self.bucket_id,
            stream_id: self.stream_id,
            commit_id: self.commit_id,
            commit_sequence: self.commit_sequence,
            stream_revision: self.stream_revision,
            commit_stamp: self.commit_stamp,
            checkpoint,
            headers: self.headers,
            events: self.events,
        }
    }
}

/// A fully persisted commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub bucket_id: String,
    pub stream_id: String,
    pub commit_id: Uuid,
    pub commit_sequence: u32,
    pub stream_revision: u32,
    pub commit_stamp: DateTime<Utc>,

    /// Globally monotonic ordering number, allocated at commit time.
    pub checkpoint: u64,

    pub headers: HashMap<String, Bytes>,
    pub events: Vec<Bytes>,
}

impl Commit {
    /// Revision of the first event in this commit.
    ///
    /// `stream_revision` names the last event; with `n` events the commit
    /// covers revisions `[first_revision(), stream_revision]`.
    pub fn first_revision(&self) -> u32 {
        self.stream_revision
            .saturating_sub(self.events.len().saturating_sub(1) as u32)
    }
}
