//! Page-Blob Object-Store Client
//!
//! This module defines [`PageBlobClient`] - the typed surface the engine
//! consumes from the underlying object store. It can be implemented by
//! different backends (the in-memory store in [`crate::memory`] for tests and
//! embedding, a cloud page-blob service in production) while the engine stays
//! backend-agnostic.
//!
//! ## What the Engine Needs
//!
//! - **Containers**: create-if-missing, list by prefix, delete
//! - **Page blobs**: create-if-missing at a provisioned size, ranged read,
//!   page-aligned ranged write, resize, whole-map metadata replace, and the
//!   per-blob atomic sequence-number primitive backing checkpoint allocation
//! - **Checkpoint table**: insert-or-replace of dispatch log rows, with the
//!   table created on first use
//!
//! ## Optimistic Concurrency
//!
//! Every blob carries an [`ETag`] that changes on every mutation. Guarded
//! mutations (`write_pages`, `resize_blob`, `set_metadata`) take the etag the
//! caller last observed and fail with `Error::Concurrency` when it is stale.
//! Two writers racing on one stream therefore cannot both succeed; the loser
//! re-reads and retries at its own discretion.
//!
//! Expected races are results, not panics: creating an existing blob returns
//! [`CreateOutcome::AlreadyExists`] rather than an error to be string-matched.

use crate::checkpoint::CheckpointEntry;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Blob metadata: a small string key/value map, replaced as a whole.
pub type BlobMetadata = HashMap<String, String>;

/// Opaque version tag; changes on every mutation of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag(pub u64);

/// Outcome of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Snapshot of a blob's control state at fetch time.
///
/// Holding a `BlobState` does not pin the blob: the etag inside is only as
/// fresh as the fetch that produced it, which is exactly what the optimistic
/// writes want.
#[derive(Debug, Clone)]
pub struct BlobState {
    pub name: String,
    pub size_bytes: u64,
    pub etag: ETag,
    pub metadata: BlobMetadata,
}

/// Typed facade over the object store's page-blob and table primitives.
#[async_trait]
pub trait PageBlobClient: Send + Sync {
    /// Raise the client's connection-pool limit. Called once at store
    /// initialization; implementations may ignore it.
    async fn set_connection_limit(&self, limit: usize) -> Result<()>;

    // ============================================================
    // CONTAINERS
    // ============================================================

    async fn create_container_if_missing(&self, container: &str) -> Result<()>;

    /// Names of all containers starting with `prefix`.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a container and everything in it. Deleting an absent container
    /// is not an error.
    async fn delete_container(&self, container: &str) -> Result<()>;

    // ============================================================
    // PAGE BLOBS
    // ============================================================

    /// Create a zero-filled page blob of `size_bytes` (a page multiple).
    /// Idempotent: an existing blob is left untouched.
    async fn create_blob_if_missing(
        &self,
        container: &str,
        blob: &str,
        size_bytes: u64,
    ) -> Result<CreateOutcome>;

    /// Fetch a blob's control state, or `None` if it does not exist.
    async fn get_blob(&self, container: &str, blob: &str) -> Result<Option<BlobState>>;

    /// All blobs in `container` whose name starts with `prefix`, metadata
    /// included.
    async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<BlobState>>;

    /// Read the half-open byte range `[start, end)`. Always a fresh request;
    /// nothing is cached between calls.
    async fn read_range(&self, container: &str, blob: &str, start: u64, end: u64) -> Result<Bytes>;

    /// Write `data` starting at the page-aligned `offset`, zero-padded to a
    /// whole number of pages. Fails with `Concurrency` if `if_match` is
    /// stale. Returns the new etag.
    async fn write_pages(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        data: Bytes,
        if_match: &ETag,
    ) -> Result<ETag>;

    /// Grow the blob to at least `new_size` bytes (a page multiple). Blobs
    /// are never shrunk. Returns the new etag.
    async fn resize_blob(
        &self,
        container: &str,
        blob: &str,
        new_size: u64,
        if_match: &ETag,
    ) -> Result<ETag>;

    /// Replace the blob's whole metadata map. Fails with `Concurrency` if
    /// `if_match` is stale. Returns the new etag.
    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        metadata: BlobMetadata,
        if_match: &ETag,
    ) -> Result<ETag>;

    /// Atomically increment the blob's sequence number and return the new
    /// value. This is the primitive behind checkpoint allocation.
    async fn increment_sequence(&self, container: &str, blob: &str) -> Result<u64>;

    async fn delete_blob(&self, container: &str, blob: &str) -> Result<()>;

    // ============================================================
    // CHECKPOINT TABLE
    // ============================================================

    /// Insert-or-replace a dispatch log row, creating the table on first use.
    async fn insert_checkpoint_entry(&self, table: &str, entry: CheckpointEntry) -> Result<()>;
}
