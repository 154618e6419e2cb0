//! Stream Blob Header and Descriptors
//!
//! Every stream blob ends with a serialized [`StreamBlobHeader`]: the index of
//! every commit the blob holds. The header itself is found through a
//! [`HeaderDefinition`] descriptor stored in blob metadata.
//!
//! ## Why Three Descriptors?
//!
//! A commit touches both blob pages (payload + new header) and blob metadata
//! (the descriptors). Either write can fail or be torn. The store therefore
//! keeps three descriptor slots:
//!
//! - **primary**: where the most recent write intended the header to be
//! - **fallback**: the previous committed descriptor, still parseable because
//!   its pages were not overwritten
//! - **tertiary**: a clone of the previous descriptor re-pointed at the *new*
//!   header offset - what a reader will find if the data write landed but the
//!   primary update did not
//!
//! The resolver in `pagestream-storage` walks the slots in that order and
//! returns the first header that deserializes.
//!
//! ## Wire Format
//!
//! `StreamBlobHeader` and `CommitDefinition` are serialized by the external
//! [`Serializer`](crate::Serializer) - no format is prescribed here.
//! `HeaderDefinition` is fixed-format: packed little-endian
//! `u64 offset || u32 size`, base64 (STANDARD) encoded, because it must fit a
//! metadata string value and round-trip byte-exactly.

use crate::error::{Error, Result};
use crate::pages;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-commit entry in the stream blob header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDefinition {
    /// Serialized payload size in bytes.
    pub data_size_bytes: u32,

    /// Caller-chosen commit id, used for duplicate detection.
    pub commit_id: Uuid,

    /// Revision of the last event in the commit.
    pub stream_revision: u32,

    /// Commit stamp as supplied by the caller.
    pub commit_stamp: DateTime<Utc>,

    /// Position of this definition in the header (0-based).
    pub ordinal: u32,

    /// First page of the payload within the blob.
    pub start_page: u32,

    /// Globally monotonic checkpoint assigned at commit time.
    pub checkpoint: u64,

    /// Whether downstream publication has been acknowledged.
    pub is_dispatched: bool,
}

impl CommitDefinition {
    /// Pages occupied by the payload: `ceil(data_size_bytes / 512)`.
    pub fn total_pages_used(&self) -> u32 {
        pages::pages_for(self.data_size_bytes as u64)
    }

    /// Byte offset of the payload within the blob.
    pub fn start_offset(&self) -> u64 {
        self.start_page as u64 * pages::PAGE_SIZE
    }

    /// Byte offset one past the payload.
    pub fn end_offset(&self) -> u64 {
        self.start_offset() + self.data_size_bytes as u64
    }
}

/// Index of every commit held by one stream blob.
///
/// Rewritten in full on every commit and on every dispatch flip. Invariants:
/// definitions are ordered by ordinal, payload spans are disjoint and
/// ascending, `last_commit_sequence` matches the newest commit, and
/// `undispatched_commit_count` counts definitions with
/// `is_dispatched == false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBlobHeader {
    pub commit_definitions: Vec<CommitDefinition>,
    pub undispatched_commit_count: u32,
    pub last_commit_sequence: u32,
}

impl StreamBlobHeader {
    /// First free page after every payload currently in the blob.
    pub fn next_start_page(&self) -> u32 {
        self.commit_definitions
            .iter()
            .map(CommitDefinition::total_pages_used)
            .sum()
    }

    pub fn contains_commit(&self, commit_id: Uuid) -> bool {
        self.commit_definitions
            .iter()
            .any(|d| d.commit_id == commit_id)
    }

    /// Append a definition for a freshly committed attempt.
    ///
    /// Bumps the undispatched count and advances `last_commit_sequence`.
    pub fn push_definition(&mut self, definition: CommitDefinition, commit_sequence: u32) {
        self.undispatched_commit_count += 1;
        self.last_commit_sequence = commit_sequence;
        self.commit_definitions.push(definition);
    }

    /// Flip a definition to dispatched. Returns false if the id is unknown or
    /// the definition was already dispatched.
    pub fn mark_dispatched(&mut self, commit_id: Uuid) -> bool {
        match self
            .commit_definitions
            .iter_mut()
            .find(|d| d.commit_id == commit_id)
        {
            Some(def) if !def.is_dispatched => {
                def.is_dispatched = true;
                self.undispatched_commit_count = self.undispatched_commit_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Definitions not yet acknowledged by the dispatcher.
    pub fn undispatched(&self) -> impl Iterator<Item = &CommitDefinition> {
        self.commit_definitions.iter().filter(|d| !d.is_dispatched)
    }
}

/// Metadata descriptor naming where a header lives within the blob.
///
/// `size == 0` means "no header" and is skipped by the resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderDefinition {
    /// Byte offset of the serialized header. Not page-aligned.
    pub start_offset: u64,

    /// Serialized header size in bytes.
    pub size: u32,
}

/// Packed wire size: little-endian u64 offset followed by u32 size.
const HEADER_DEFINITION_BYTES: usize = 12;

impl HeaderDefinition {
    pub fn new(start_offset: u64, size: u32) -> Self {
        Self { start_offset, size }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// A clone of this descriptor re-pointed at `start_offset`.
    pub fn at_offset(&self, start_offset: u64) -> Self {
        Self {
            start_offset,
            size: self.size,
        }
    }

    /// Encode as base64 of the packed little-endian form.
    pub fn encode(&self) -> String {
        let mut buf = [0u8; HEADER_DEFINITION_BYTES];
        buf[..8].copy_from_slice(&self.start_offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        STANDARD.encode(buf)
    }

    /// Decode from the base64 metadata string form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidHeaderDefinition(format!("bad base64: {e}")))?;
        if bytes.len() != HEADER_DEFINITION_BYTES {
            return Err(Error::InvalidHeaderDefinition(format!(
                "expected {} bytes, got {}",
                HEADER_DEFINITION_BYTES,
                bytes.len()
            )));
        }
        let start_offset = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let size = u32::from_le_bytes(bytes[8..].try_into().unwrap());
        Ok(Self { start_offset, size })
    }
}
