//! Dispatch Tracking
//!
//! Commits are published downstream at-least-once. Each commit definition
//! carries an `is_dispatched` flag; this module finds the ones still pending
//! and flips them once acknowledged.
//!
//! ## The Scan
//!
//! `get_undispatched_commits` walks every blob in the stream container. Two
//! metadata checks keep the walk cheap: blobs that are not stream aggregates
//! are skipped outright, and the `hasUndispatchedCommits` hint skips streams
//! already drained. The hint may overstate (it is set optimistically on every
//! commit); when a resolved header shows nothing pending the hint is repaired
//! in place.
//!
//! A scan races with committers by design, so a concurrency failure on one
//! blob re-reads the handle and retries, bounded, instead of failing the whole
//! enumeration. A blob whose header cannot be resolved at all is logged and
//! skipped - one corrupt stream must not block dispatch for every other.
//!
//! ## The Flip
//!
//! `mark_commit_dispatched` rewrites only the header, at the same offset,
//! through the same metadata-then-pages protocol as a commit. The dispatch is
//! additionally logged to the per-bucket checkpoint table before the flip, so
//! the log never misses an acknowledged commit.

use crate::blob::{keys, StreamBlob};
use crate::checkpoint::{self, CheckpointEntry};
use crate::engine::{stream_blob_name, BlobEventStore};
use crate::error::{Error, Result};
use crate::resolver;
use bytes::BytesMut;
use chrono::Utc;
use pagestream_core::{pages, Commit, CommitDefinition, HeaderDefinition, Serializer};

/// Attempts per blob before a concurrency failure is surfaced.
const SCAN_RETRY_LIMIT: u32 = 20;

impl<S: Serializer> BlobEventStore<S> {
    /// Every commit not yet marked dispatched, across all streams, in
    /// ascending checkpoint order.
    pub async fn get_undispatched_commits(&self) -> Result<Vec<Commit>> {
        let states = self.client.list_blobs(&self.container, "").await?;
        let mut pending: Vec<(String, CommitDefinition)> = Vec::new();

        'blobs: for state in states {
            let mut blob = StreamBlob::from_state(self.client.clone(), &self.container, state);
            if !blob.is_aggregate() || !blob.has_undispatched_hint() {
                continue;
            }

            let mut attempts = 0;
            let definitions = loop {
                attempts += 1;
                match self.scan_for_undispatched(&mut blob).await {
                    Ok(definitions) => break definitions,
                    Err(e) if e.is_concurrency() && attempts < SCAN_RETRY_LIMIT => {
                        tracing::debug!(
                            blob = %blob.name(),
                            attempts,
                            "undispatched scan raced a writer, re-reading"
                        );
                        blob.refresh().await?;
                    }
                    Err(Error::InvalidHeaderData(msg)) => {
                        tracing::error!(
                            blob = %blob.name(),
                            %msg,
                            "skipping unresolvable blob during undispatched scan"
                        );
                        continue 'blobs;
                    }
                    Err(e) => return Err(e),
                }
            };

            let name = blob.name().to_string();
            pending.extend(definitions.into_iter().map(|d| (name.clone(), d)));
        }

        pending.sort_by_key(|(_, definition)| definition.checkpoint);

        let mut commits = Vec::with_capacity(pending.len());
        for (name, definition) in &pending {
            commits.push(self.materialize(&self.container, name, definition).await?);
        }
        Ok(commits)
    }

    async fn scan_for_undispatched(
        &self,
        blob: &mut StreamBlob,
    ) -> Result<Vec<CommitDefinition>> {
        let resolved = resolver::resolve(blob, self.serializer.as_ref()).await?;
        if resolved.header.undispatched_commit_count == 0 {
            // The hint overstated; repair it so later scans skip this stream.
            let mut metadata = blob.metadata().clone();
            metadata.insert(
                keys::HAS_UNDISPATCHED_COMMITS.to_string(),
                "False".to_string(),
            );
            blob.set_metadata(metadata).await?;
            return Ok(Vec::new());
        }
        Ok(resolved.header.undispatched().cloned().collect())
    }

    /// Record downstream publication of `commit` and flip its definition.
    pub async fn mark_commit_dispatched(&self, commit: &Commit) -> Result<()> {
        let table = checkpoint::table_name(&self.container, &commit.bucket_id);
        self.client
            .insert_checkpoint_entry(
                &table,
                CheckpointEntry {
                    bucket_id: commit.bucket_id.clone(),
                    stream_id: commit.stream_id.clone(),
                    commit_id: commit.commit_id,
                    checkpoint: commit.checkpoint,
                    dispatched_at: Utc::now(),
                },
            )
            .await?;

        let name = stream_blob_name(&commit.bucket_id, &commit.stream_id);
        let mut blob = StreamBlob::open(self.client.clone(), &self.container, &name).await?;
        let resolved = resolver::resolve(&blob, self.serializer.as_ref()).await?;
        let mut header = resolved.header;
        if !header.mark_dispatched(commit.commit_id) {
            tracing::warn!(
                commit_id = %commit.commit_id,
                blob = %name,
                "commit already dispatched or unknown; nothing to flip"
            );
            return Ok(());
        }

        let last_good = resolved.descriptor;
        let header_bytes = self.serializer.serialize(&header)?;
        let descriptor = HeaderDefinition::new(last_good.start_offset, header_bytes.len() as u32);

        // Header-only rewrite at the same offset. The header rarely starts on
        // a page boundary, so the write re-carries the lead bytes sharing its
        // first page (the tail of the last payload).
        let page_start = pages::page_floor(descriptor.start_offset);
        let lead = blob.download(page_start, descriptor.start_offset).await?;

        let total_needed =
            page_start + pages::align_up(lead.len() as u64 + header_bytes.len() as u64);
        if blob.size_bytes() < total_needed {
            blob.resize_to(total_needed).await?;
        }

        let mut metadata = blob.metadata().clone();
        metadata.insert(keys::PRIMARY_HEADER_DEFINITION.to_string(), descriptor.encode());
        metadata.insert(
            keys::FALLBACK_HEADER_DEFINITION.to_string(),
            last_good.encode(),
        );
        metadata.insert(
            keys::TERTIARY_HEADER_DEFINITION.to_string(),
            last_good.at_offset(descriptor.start_offset).encode(),
        );
        metadata.insert(keys::FIRST_WRITE_COMPLETED.to_string(), "t".to_string());
        metadata.insert(
            keys::HAS_UNDISPATCHED_COMMITS.to_string(),
            if header.undispatched_commit_count > 0 {
                "True".to_string()
            } else {
                "False".to_string()
            },
        );
        blob.set_metadata(metadata).await?;

        let mut body = BytesMut::with_capacity(lead.len() + header_bytes.len());
        body.extend_from_slice(&lead);
        body.extend_from_slice(&header_bytes);
        blob.write(page_start, body.freeze()).await?;

        tracing::info!(
            bucket = %commit.bucket_id,
            stream = %commit.stream_id,
            commit_id = %commit.commit_id,
            checkpoint = commit.checkpoint,
            remaining = header.undispatched_commit_count,
            "commit marked dispatched"
        );
        Ok(())
    }
}
