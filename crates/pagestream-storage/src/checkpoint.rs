//! Checkpoint Allocation and Dispatch Log
//!
//! Every commit receives a checkpoint: a 64-bit number that orders commits
//! across all streams. The counter is the sequence number of a single
//! reserved page blob (`$root/checkpoint`), which the object store increments
//! atomically - uniqueness comes from the primitive, not from this code.
//!
//! Monotonicity is global; density is not. A commit that fails after
//! allocation leaves a hole, and that is fine: consumers order by checkpoint,
//! they do not count by it.
//!
//! Dispatch acknowledgements are additionally logged to a per-bucket table
//! (`"chpt" + container + bucket`), one row per dispatched commit.

use crate::client::PageBlobClient;
use crate::error::Result;
use chrono::{DateTime, Utc};
use pagestream_core::pages;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Reserved container holding the checkpoint blob.
pub const ROOT_CONTAINER: &str = "$root";

/// Name of the one-page checkpoint blob.
pub const CHECKPOINT_BLOB: &str = "checkpoint";

/// Name of the dispatch log table for `bucket_id`.
pub fn table_name(container: &str, bucket_id: &str) -> String {
    format!("chpt{container}{bucket_id}")
}

/// One row of the per-bucket dispatch log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub bucket_id: String,
    pub stream_id: String,
    pub commit_id: Uuid,
    pub checkpoint: u64,
    pub dispatched_at: DateTime<Utc>,
}

/// Hands out globally monotonic checkpoint numbers.
pub struct CheckpointAllocator {
    client: Arc<dyn PageBlobClient>,
}

impl CheckpointAllocator {
    pub fn new(client: Arc<dyn PageBlobClient>) -> Self {
        Self { client }
    }

    /// Create the root container and checkpoint blob if missing.
    pub async fn provision(&self) -> Result<()> {
        self.client.create_container_if_missing(ROOT_CONTAINER).await?;
        self.client
            .create_blob_if_missing(ROOT_CONTAINER, CHECKPOINT_BLOB, pages::PAGE_SIZE)
            .await?;
        Ok(())
    }

    /// Allocate the next checkpoint.
    pub async fn next(&self) -> Result<u64> {
        self.client
            .increment_sequence(ROOT_CONTAINER, CHECKPOINT_BLOB)
            .await
    }
}
