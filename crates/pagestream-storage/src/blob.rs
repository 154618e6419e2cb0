//! Stream Blob Facade
//!
//! [`StreamBlob`] binds a [`PageBlobClient`] to one named blob and carries the
//! control state (size, etag, metadata) from the most recent fetch. Every
//! guarded mutation uses the carried etag, so a `StreamBlob` is an optimistic
//! claim on one version of the blob: if anyone else moved it, the next write
//! fails with `Concurrency` and the caller re-opens.
//!
//! Handles are cheap and never cached across engine operations - each
//! operation opens a fresh one, because a metadata refresh is required for
//! correctness anyway.

use crate::client::{BlobMetadata, BlobState, CreateOutcome, PageBlobClient};
use crate::error::{Error, Result};
use bytes::Bytes;
use pagestream_core::HeaderDefinition;
use std::sync::Arc;

/// Metadata keys written on stream and snapshot blobs.
///
/// These are wire-visible: blobs written by earlier releases already carry
/// them, so the exact strings are load-bearing.
pub mod keys {
    /// `"yes"` once the blob holds at least one commit.
    pub const IS_EVENT_STREAM_AGGREGATE: &str = "isEventStreamAggregate";

    /// `"True"` / `"False"` hint for the undispatched scan.
    pub const HAS_UNDISPATCHED_COMMITS: &str = "hasUndispatchedCommits";

    /// `"t"` after the first commit fully persisted; `"f"` between reserving
    /// the primary descriptor and completing the first write.
    pub const FIRST_WRITE_COMPLETED: &str = "firstWriteCompleted";

    pub const PRIMARY_HEADER_DEFINITION: &str = "primaryHeaderDefinition";
    pub const FALLBACK_HEADER_DEFINITION: &str = "fallbackHeaderDefinition";

    /// Misspelled since the first release; kept verbatim so existing blobs
    /// stay readable.
    pub const TERTIARY_HEADER_DEFINITION: &str = "tertiaryHeaderDefintionKey";

    /// Snapshot blob: serialized payload size in bytes.
    pub const SNAPSHOT_SIZE_BYTES: &str = "ss_data_size_bytes";

    /// Snapshot blob: stream revision the snapshot covers.
    pub const SNAPSHOT_STREAM_REVISION: &str = "ss_stream_revision";
}

/// The three header-descriptor slots, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSlot {
    Primary,
    Fallback,
    Tertiary,
}

impl DescriptorSlot {
    pub const RESOLUTION_ORDER: [DescriptorSlot; 3] = [
        DescriptorSlot::Primary,
        DescriptorSlot::Fallback,
        DescriptorSlot::Tertiary,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DescriptorSlot::Primary => keys::PRIMARY_HEADER_DEFINITION,
            DescriptorSlot::Fallback => keys::FALLBACK_HEADER_DEFINITION,
            DescriptorSlot::Tertiary => keys::TERTIARY_HEADER_DEFINITION,
        }
    }
}

/// A handle on one blob at one observed version.
pub struct StreamBlob {
    client: Arc<dyn PageBlobClient>,
    container: String,
    state: BlobState,
}

impl std::fmt::Debug for StreamBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBlob")
            .field("container", &self.container)
            .field("state", &self.state)
            .finish()
    }
}

impl StreamBlob {
    /// Open an existing blob; `NotFound` if it is absent.
    pub async fn open(
        client: Arc<dyn PageBlobClient>,
        container: &str,
        name: &str,
    ) -> Result<Self> {
        Self::try_open(client, container, name)
            .await?
            .ok_or_else(|| Error::NotFound {
                container: container.to_string(),
                blob: name.to_string(),
            })
    }

    /// Open an existing blob, or `None` if it is absent.
    pub async fn try_open(
        client: Arc<dyn PageBlobClient>,
        container: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        let state = client.get_blob(container, name).await?;
        Ok(state.map(|state| Self {
            client,
            container: container.to_string(),
            state,
        }))
    }

    /// Open the blob, creating it zero-filled at `size_bytes` if missing.
    pub async fn open_or_create(
        client: Arc<dyn PageBlobClient>,
        container: &str,
        name: &str,
        size_bytes: u64,
    ) -> Result<(Self, CreateOutcome)> {
        let outcome = client
            .create_blob_if_missing(container, name, size_bytes)
            .await?;
        let blob = Self::open(client, container, name).await?;
        Ok((blob, outcome))
    }

    /// Wrap a state obtained from a listing without another fetch.
    pub fn from_state(client: Arc<dyn PageBlobClient>, container: &str, state: BlobState) -> Self {
        Self {
            client,
            container: container.to_string(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn size_bytes(&self) -> u64 {
        self.state.size_bytes
    }

    pub fn metadata(&self) -> &BlobMetadata {
        &self.state.metadata
    }

    /// Re-fetch control state, discarding the carried version.
    pub async fn refresh(&mut self) -> Result<()> {
        self.state = self
            .client
            .get_blob(&self.container, &self.state.name)
            .await?
            .ok_or_else(|| Error::NotFound {
                container: self.container.clone(),
                blob: self.state.name.clone(),
            })?;
        Ok(())
    }

    /// Fresh ranged read of `[start, end)`.
    pub async fn download(&self, start: u64, end: u64) -> Result<Bytes> {
        self.client
            .read_range(&self.container, &self.state.name, start, end)
            .await
    }

    /// Page-aligned guarded write.
    pub async fn write(&mut self, offset: u64, data: Bytes) -> Result<()> {
        let etag = self
            .client
            .write_pages(&self.container, &self.state.name, offset, data, &self.state.etag)
            .await?;
        self.state.etag = etag;
        Ok(())
    }

    /// Grow the blob to at least `total_bytes` (a page multiple).
    pub async fn resize_to(&mut self, total_bytes: u64) -> Result<()> {
        let etag = self
            .client
            .resize_blob(&self.container, &self.state.name, total_bytes, &self.state.etag)
            .await?;
        self.state.etag = etag;
        if total_bytes > self.state.size_bytes {
            self.state.size_bytes = total_bytes;
        }
        Ok(())
    }

    /// Whole-map guarded metadata replace.
    pub async fn set_metadata(&mut self, metadata: BlobMetadata) -> Result<()> {
        let etag = self
            .client
            .set_metadata(
                &self.container,
                &self.state.name,
                metadata.clone(),
                &self.state.etag,
            )
            .await?;
        self.state.etag = etag;
        self.state.metadata = metadata;
        Ok(())
    }

    pub async fn delete(self) -> Result<()> {
        self.client
            .delete_blob(&self.container, &self.state.name)
            .await
    }

    // ============================================================
    // TYPED METADATA ACCESSORS
    // ============================================================

    /// Decode one descriptor slot. `Ok(None)` if the key is absent; a decode
    /// failure is reported so the resolver can treat the slot as unusable.
    pub fn header_definition(&self, slot: DescriptorSlot) -> Result<Option<HeaderDefinition>> {
        match self.state.metadata.get(slot.key()) {
            None => Ok(None),
            Some(encoded) => Ok(Some(HeaderDefinition::decode(encoded)?)),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.state.metadata.get(keys::IS_EVENT_STREAM_AGGREGATE).map(String::as_str) == Some("yes")
    }

    pub fn has_undispatched_hint(&self) -> bool {
        self.state.metadata.get(keys::HAS_UNDISPATCHED_COMMITS).map(String::as_str) == Some("True")
    }

    /// True while a first write has reserved its descriptor but never
    /// completed; such a stream reads as empty.
    pub fn first_write_pending(&self) -> bool {
        self.state.metadata.get(keys::FIRST_WRITE_COMPLETED).map(String::as_str) == Some("f")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPageBlobClient;

    const CONTAINER: &str = "evsrctest";

    async fn open_fresh() -> StreamBlob {
        let client = Arc::new(InMemoryPageBlobClient::new());
        client.create_container_if_missing(CONTAINER).await.unwrap();
        let (blob, outcome) =
            StreamBlob::open_or_create(client, CONTAINER, "b/s", 1024).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
        blob
    }

    #[tokio::test]
    async fn test_stale_handle_write_fails_after_foreign_mutation() {
        let mut blob = open_fresh().await;
        let client = blob.client.clone();

        // Someone else moves the blob.
        let state = client.get_blob(CONTAINER, "b/s").await.unwrap().unwrap();
        client
            .set_metadata(CONTAINER, "b/s", BlobMetadata::new(), &state.etag)
            .await
            .unwrap();

        let err = blob.write(0, Bytes::from("x")).await.unwrap_err();
        assert!(err.is_concurrency());

        // After refresh the handle works again.
        blob.refresh().await.unwrap();
        blob.write(0, Bytes::from("x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_metadata_updates_carried_state() {
        let mut blob = open_fresh().await;
        let mut metadata = BlobMetadata::new();
        metadata.insert(
            keys::IS_EVENT_STREAM_AGGREGATE.to_string(),
            "yes".to_string(),
        );
        blob.set_metadata(metadata).await.unwrap();
        assert!(blob.is_aggregate());

        // Consecutive guarded mutations through one handle keep working.
        blob.write(0, Bytes::from("x")).await.unwrap();
        blob.resize_to(2048).await.unwrap();
        assert_eq!(blob.size_bytes(), 2048);
    }

    #[tokio::test]
    async fn test_header_definition_slots() {
        let mut blob = open_fresh().await;
        assert!(blob
            .header_definition(DescriptorSlot::Primary)
            .unwrap()
            .is_none());

        let def = HeaderDefinition::new(700, 42);
        let mut metadata = BlobMetadata::new();
        metadata.insert(keys::PRIMARY_HEADER_DEFINITION.to_string(), def.encode());
        metadata.insert(
            keys::TERTIARY_HEADER_DEFINITION.to_string(),
            "garbage!!".to_string(),
        );
        blob.set_metadata(metadata).await.unwrap();

        assert_eq!(
            blob.header_definition(DescriptorSlot::Primary).unwrap(),
            Some(def)
        );
        assert!(blob.header_definition(DescriptorSlot::Fallback).unwrap().is_none());
        assert!(blob.header_definition(DescriptorSlot::Tertiary).is_err());
    }

    #[tokio::test]
    async fn test_open_absent_blob() {
        let client = Arc::new(InMemoryPageBlobClient::new());
        client.create_container_if_missing(CONTAINER).await.unwrap();
        assert!(StreamBlob::try_open(client.clone(), CONTAINER, "nope")
            .await
            .unwrap()
            .is_none());
        let err = StreamBlob::open(client, CONTAINER, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
