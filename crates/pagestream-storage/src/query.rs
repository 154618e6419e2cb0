//! Query Layer
//!
//! Three read shapes, each trading differently against the object store's
//! per-request latency:
//!
//! - **By revision** (one stream): the header pins every payload's span and
//!   every definition's last revision, so both ends of the candidate range
//!   come from metadata alone. The range is fetched in a single contiguous
//!   read and sliced in memory; only a boundary commit that turns out to
//!   start past the window is dropped after deserialization.
//! - **By date** (one bucket): enumerate the bucket's blobs, filter
//!   definitions on the commit stamp, then materialize each hit.
//! - **By checkpoint** (bucket or whole store): enumerate everything, flatten
//!   every definition, order by checkpoint, materialize. O(aggregates) and
//!   deliberately so - there is no secondary index.
//!
//! Blobs whose headers cannot be resolved are logged and skipped during
//! enumeration; a payload that does not deserialize surfaces `Corrupt`.

use crate::blob::StreamBlob;
use crate::engine::{stream_blob_name, BlobEventStore};
use crate::error::{Error, Result};
use crate::resolver;
use chrono::{DateTime, Utc};
use pagestream_core::{Commit, CommitDefinition, Serializer};

impl<S: Serializer> BlobEventStore<S> {
    /// Commits of one stream whose events touch `[min_revision, max_revision]`.
    pub async fn get_from_revision(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u32,
        max_revision: u32,
    ) -> Result<Vec<Commit>> {
        let name = stream_blob_name(bucket_id, stream_id);
        let Some(blob) = StreamBlob::try_open(self.client.clone(), &self.container, &name).await?
        else {
            return Ok(Vec::new());
        };
        let resolved = resolver::resolve(&blob, self.serializer.as_ref()).await?;
        let definitions = resolved.header.commit_definitions;

        // Definitions ascend in revision; the first one reaching min_revision
        // starts the candidate range, and the first one reaching max_revision
        // ends it - later definitions start past the window.
        let Some(first) = definitions
            .iter()
            .position(|d| d.stream_revision >= min_revision)
        else {
            return Ok(Vec::new());
        };
        let candidates = &definitions[first..];
        let last = candidates
            .iter()
            .position(|d| d.stream_revision >= max_revision)
            .unwrap_or(candidates.len() - 1);
        let candidates = &candidates[..=last];
        let base = candidates[0].start_offset();
        let end = candidates[last].end_offset();

        // One read spans every candidate; slicing happens in memory.
        let bytes = blob.download(base, end).await?;
        let mut commits = Vec::new();
        for definition in candidates {
            let lo = (definition.start_offset() - base) as usize;
            let slice = bytes.slice(lo..lo + definition.data_size_bytes as usize);
            let commit: Commit = self.serializer.deserialize(&slice).map_err(|e| {
                Error::Corrupt(format!(
                    "commit {} in {}/{name}: {e}",
                    definition.commit_id, self.container
                ))
            })?;
            if commit.first_revision() > max_revision {
                break;
            }
            commits.push(commit);
        }
        Ok(commits)
    }

    /// Commits of one bucket stamped at or after `start`.
    pub async fn get_from_instant(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
    ) -> Result<Vec<Commit>> {
        self.get_from_to(bucket_id, start, DateTime::<Utc>::MAX_UTC).await
    }

    /// Commits of one bucket stamped within `[start, end)`, ordered by stamp.
    pub async fn get_from_to(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Commit>> {
        let mut found = Vec::new();
        self.collect_definitions(&self.container, &format!("{bucket_id}/"), &mut found)
            .await?;
        found.retain(|(_, _, d)| d.commit_stamp >= start && d.commit_stamp < end);
        found.sort_by_key(|(_, _, d)| d.commit_stamp);
        self.materialize_all(found).await
    }

    /// Every commit in the store with checkpoint greater than `token`,
    /// ordered by checkpoint. Walks every `evsrc*` container.
    pub async fn get_from_checkpoint(&self, token: u64) -> Result<Vec<Commit>> {
        let mut found = Vec::new();
        for container in self.client.list_containers("evsrc").await? {
            self.collect_definitions(&container, "", &mut found).await?;
        }
        found.retain(|(_, _, d)| d.checkpoint > token);
        found.sort_by_key(|(_, _, d)| d.checkpoint);
        self.materialize_all(found).await
    }

    /// Every commit of one bucket with checkpoint greater than `token`,
    /// ordered by checkpoint.
    pub async fn get_bucket_from_checkpoint(
        &self,
        bucket_id: &str,
        token: u64,
    ) -> Result<Vec<Commit>> {
        let mut found = Vec::new();
        self.collect_definitions(&self.container, &format!("{bucket_id}/"), &mut found)
            .await?;
        found.retain(|(_, _, d)| d.checkpoint > token);
        found.sort_by_key(|(_, _, d)| d.checkpoint);
        self.materialize_all(found).await
    }

    /// Flatten the definitions of every aggregate blob under a prefix.
    async fn collect_definitions(
        &self,
        container: &str,
        prefix: &str,
        out: &mut Vec<(String, String, CommitDefinition)>,
    ) -> Result<()> {
        for state in self.client.list_blobs(container, prefix).await? {
            let blob = StreamBlob::from_state(self.client.clone(), container, state);
            if !blob.is_aggregate() {
                continue;
            }
            match resolver::resolve(&blob, self.serializer.as_ref()).await {
                Ok(resolved) => {
                    let name = blob.name().to_string();
                    out.extend(
                        resolved
                            .header
                            .commit_definitions
                            .into_iter()
                            .map(|d| (container.to_string(), name.clone(), d)),
                    );
                }
                Err(Error::InvalidHeaderData(msg)) => {
                    tracing::error!(
                        container,
                        blob = %blob.name(),
                        %msg,
                        "skipping unresolvable blob during enumeration"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn materialize_all(
        &self,
        found: Vec<(String, String, CommitDefinition)>,
    ) -> Result<Vec<Commit>> {
        let mut commits = Vec::with_capacity(found.len());
        for (container, name, definition) in &found {
            commits.push(self.materialize(container, name, definition).await?);
        }
        Ok(commits)
    }
}
