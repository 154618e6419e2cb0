//! Commit Engine
//!
//! [`BlobEventStore`] is the persistence engine the surrounding event-sourcing
//! framework talks to. This module holds the construction/initialization
//! surface, the append path, and stream lifecycle (purge / delete / drop);
//! queries, dispatch tracking and snapshots live in sibling modules as
//! further `impl` blocks on the same type.
//!
//! ## The Append Path
//!
//! ```text
//! commit(attempt)
//!     ↓
//! open-or-create stream blob          ← provisioned at blob_num_pages
//!     ↓
//! resolve last good header (H, D0)
//!     ↓
//! duplicate / sequence checks
//!     ↓
//! allocate checkpoint
//!     ↓
//! serialize payload + updated header
//!     ↓
//! resize if the append would not fit
//!     ↓
//! rotate descriptors in metadata      ← primary=new, fallback=D0,
//!     ↓                                 tertiary=D0 at the new offset
//! one aligned write: payload ‖ header
//!     ↓
//! (first write only) flip firstWriteCompleted to "t"
//! ```
//!
//! Metadata moves *before* the pages do. If the page write never lands, the
//! primary descriptor points at unwritten pages, deserialization fails, and
//! the resolver recovers the previous header through the fallback slot. Both
//! the metadata update and the page write are guarded by the etag observed at
//! resolve time, so of two racing committers exactly one wins; the loser
//! surfaces `Concurrency` and may retry from scratch.

use crate::blob::{keys, StreamBlob};
use crate::checkpoint::CheckpointAllocator;
use crate::client::PageBlobClient;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::resolver;
use bytes::BytesMut;
use pagestream_core::{pages, Commit, CommitAttempt, CommitDefinition, HeaderDefinition, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Blob path of a stream within its container.
pub(crate) fn stream_blob_name(bucket_id: &str, stream_id: &str) -> String {
    format!("{bucket_id}/{stream_id}")
}

/// Blob path of a stream's snapshot sibling.
pub(crate) fn snapshot_blob_name(bucket_id: &str, stream_id: &str) -> String {
    format!("{bucket_id}/ss/{stream_id}")
}

/// Append-only event-sourced commit store over page blobs.
pub struct BlobEventStore<S> {
    pub(crate) client: Arc<dyn PageBlobClient>,
    pub(crate) serializer: Arc<S>,
    pub(crate) config: StoreConfig,
    /// Resolved container name: `"evsrc" + lowercase(container_name)`.
    pub(crate) container: String,
    pub(crate) checkpoints: CheckpointAllocator,
    initialized: AtomicBool,
}

impl<S: Serializer> BlobEventStore<S> {
    pub fn new(client: Arc<dyn PageBlobClient>, serializer: S, config: StoreConfig) -> Self {
        let container = config.container();
        Self {
            checkpoints: CheckpointAllocator::new(client.clone()),
            client,
            serializer: Arc::new(serializer),
            config,
            container,
            initialized: AtomicBool::new(false),
        }
    }

    /// One-time setup: connection limit, stream container, checkpoint blob.
    ///
    /// Idempotent; later calls short-circuit. Safe to race from multiple
    /// tasks - the loser of the flag simply returns.
    pub async fn initialize(&self) -> Result<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let outcome = async {
            self.client
                .set_connection_limit(self.config.parallel_connection_limit)
                .await?;
            self.client
                .create_container_if_missing(&self.container)
                .await?;
            self.checkpoints.provision().await
        }
        .await;
        if outcome.is_err() {
            self.initialized.store(false, Ordering::SeqCst);
        } else {
            tracing::info!(container = %self.container, "store initialized");
        }
        outcome
    }

    /// Append `attempt` to its stream and return the persisted commit.
    pub async fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        let blob_name = stream_blob_name(&attempt.bucket_id, &attempt.stream_id);
        let (mut blob, _) = StreamBlob::open_or_create(
            self.client.clone(),
            &self.container,
            &blob_name,
            self.config.initial_blob_size(),
        )
        .await?;

        let resolved = resolver::resolve(&blob, self.serializer.as_ref()).await?;
        let header = resolved.header;
        let last_good = resolved.descriptor;
        let first_write = last_good.is_empty();

        if header.contains_commit(attempt.commit_id) {
            return Err(Error::DuplicateCommit {
                commit_id: attempt.commit_id,
            });
        }
        if attempt.commit_sequence <= header.last_commit_sequence {
            return Err(Error::Concurrency(format!(
                "commit sequence {} does not advance past {} on {}",
                attempt.commit_sequence, header.last_commit_sequence, blob_name
            )));
        }

        let checkpoint = self.checkpoints.next().await?;
        let commit = attempt.into_commit(checkpoint);
        let payload = self.serializer.serialize(&commit)?;

        let start_page = header.next_start_page();
        let definition = CommitDefinition {
            data_size_bytes: payload.len() as u32,
            commit_id: commit.commit_id,
            stream_revision: commit.stream_revision,
            commit_stamp: commit.commit_stamp,
            ordinal: header.commit_definitions.len() as u32,
            start_page,
            checkpoint,
            is_dispatched: false,
        };
        let payload_pages = definition.total_pages_used();
        let mut new_header = header;
        new_header.push_definition(definition, commit.commit_sequence);
        let header_bytes = self.serializer.serialize(&new_header)?;

        let write_start = start_page as u64 * pages::PAGE_SIZE;
        let header_offset = write_start + payload.len() as u64;
        let total_needed =
            write_start + pages::align_up((payload.len() + header_bytes.len()) as u64);
        if blob.size_bytes() < total_needed {
            blob.resize_to(total_needed).await?;
        }

        // Rotate descriptors before any page lands; a torn page write then
        // recovers through the fallback slot.
        let new_descriptor = HeaderDefinition::new(header_offset, header_bytes.len() as u32);
        let mut metadata = blob.metadata().clone();
        metadata.insert(
            keys::PRIMARY_HEADER_DEFINITION.to_string(),
            new_descriptor.encode(),
        );
        if first_write {
            metadata.insert(keys::FIRST_WRITE_COMPLETED.to_string(), "f".to_string());
        } else {
            metadata.insert(
                keys::FALLBACK_HEADER_DEFINITION.to_string(),
                last_good.encode(),
            );
            metadata.insert(
                keys::TERTIARY_HEADER_DEFINITION.to_string(),
                last_good.at_offset(header_offset).encode(),
            );
            metadata.insert(keys::FIRST_WRITE_COMPLETED.to_string(), "t".to_string());
        }
        metadata.insert(
            keys::IS_EVENT_STREAM_AGGREGATE.to_string(),
            "yes".to_string(),
        );
        metadata.insert(
            keys::HAS_UNDISPATCHED_COMMITS.to_string(),
            "True".to_string(),
        );
        blob.set_metadata(metadata.clone()).await?;

        let mut body = BytesMut::with_capacity(payload.len() + header_bytes.len());
        body.extend_from_slice(&payload);
        body.extend_from_slice(&header_bytes);
        blob.write(write_start, body.freeze()).await?;

        // The extra round-trip turns an ambiguous first write into a
        // recoverable one: a crash before this point leaves "f" and the
        // stream reads as empty.
        if first_write {
            metadata.insert(keys::FIRST_WRITE_COMPLETED.to_string(), "t".to_string());
            blob.set_metadata(metadata).await?;
        }

        tracing::info!(
            bucket = %commit.bucket_id,
            stream = %commit.stream_id,
            sequence = commit.commit_sequence,
            checkpoint,
            payload_pages,
            "commit appended"
        );
        Ok(commit)
    }

    /// Read one commit's payload back out of a blob.
    pub(crate) async fn materialize(
        &self,
        container: &str,
        blob_name: &str,
        definition: &CommitDefinition,
    ) -> Result<Commit> {
        let bytes = self
            .client
            .read_range(
                container,
                blob_name,
                definition.start_offset(),
                definition.end_offset(),
            )
            .await?;
        self.serializer.deserialize(&bytes).map_err(|e| {
            Error::Corrupt(format!(
                "commit {} in {container}/{blob_name}: {e}",
                definition.commit_id
            ))
        })
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    /// Delete every stream and snapshot blob in every bucket.
    pub async fn purge_all(&self) -> Result<()> {
        self.purge_prefix("").await
    }

    /// Delete every stream and snapshot blob of one bucket.
    pub async fn purge_bucket(&self, bucket_id: &str) -> Result<()> {
        self.purge_prefix(&format!("{bucket_id}/")).await
    }

    async fn purge_prefix(&self, prefix: &str) -> Result<()> {
        let states = self.client.list_blobs(&self.container, prefix).await?;
        let count = states.len();
        for state in states {
            self.client.delete_blob(&self.container, &state.name).await?;
        }
        tracing::info!(container = %self.container, prefix, count, "purged blobs");
        Ok(())
    }

    /// Delete one stream's blob and its snapshot. Absent blobs are ignored;
    /// there are no tombstones.
    pub async fn delete_stream(&self, bucket_id: &str, stream_id: &str) -> Result<()> {
        for name in [
            stream_blob_name(bucket_id, stream_id),
            snapshot_blob_name(bucket_id, stream_id),
        ] {
            match self.client.delete_blob(&self.container, &name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Delete every `evsrc*` container this store family owns.
    pub async fn drop_store(&self) -> Result<()> {
        for container in self.client.list_containers("evsrc").await? {
            self.client.delete_container(&container).await?;
        }
        tracing::info!("store dropped");
        Ok(())
    }
}
