//! Snapshot Store
//!
//! One snapshot per stream, in a sibling blob at `"{bucket}/ss/{stream}"`.
//! The serialized payload starts at offset 0; its size and covered revision
//! live in blob metadata.
//!
//! Writes invalidate before they publish: metadata is zeroed, the payload is
//! written, and only then are size and revision recorded. A crash anywhere in
//! between leaves `ss_data_size_bytes == 0`, which readers treat as "no
//! snapshot".

use crate::blob::{keys, StreamBlob};
use crate::client::BlobMetadata;
use crate::engine::{snapshot_blob_name, BlobEventStore};
use crate::error::{Error, Result};
use bytes::Bytes;
use pagestream_core::{pages, Serializer, Snapshot};

impl<S: Serializer> BlobEventStore<S> {
    /// Store `snapshot` as its stream's only retained snapshot.
    pub async fn add_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let name = snapshot_blob_name(&snapshot.bucket_id, &snapshot.stream_id);
        let (mut blob, _) = StreamBlob::open_or_create(
            self.client.clone(),
            &self.container,
            &name,
            self.config.initial_blob_size(),
        )
        .await?;

        let mut metadata = BlobMetadata::new();
        metadata.insert(keys::SNAPSHOT_SIZE_BYTES.to_string(), "0".to_string());
        metadata.insert(keys::SNAPSHOT_STREAM_REVISION.to_string(), "0".to_string());
        blob.set_metadata(metadata).await?;

        let bytes = self.serializer.serialize(&snapshot)?;
        let size = bytes.len() as u64;
        if blob.size_bytes() < pages::align_up(size) {
            blob.resize_to(pages::align_up(size)).await?;
        }
        blob.write(0, Bytes::from(bytes)).await?;

        let mut metadata = blob.metadata().clone();
        metadata.insert(keys::SNAPSHOT_SIZE_BYTES.to_string(), size.to_string());
        metadata.insert(
            keys::SNAPSHOT_STREAM_REVISION.to_string(),
            snapshot.stream_revision.to_string(),
        );
        blob.set_metadata(metadata).await?;

        tracing::info!(
            bucket = %snapshot.bucket_id,
            stream = %snapshot.stream_id,
            revision = snapshot.stream_revision,
            size,
            "snapshot stored"
        );
        Ok(())
    }

    /// The stored snapshot, if one exists and covers at most `max_revision`.
    pub async fn get_snapshot(
        &self,
        bucket_id: &str,
        stream_id: &str,
        max_revision: u32,
    ) -> Result<Option<Snapshot>> {
        let name = snapshot_blob_name(bucket_id, stream_id);
        let Some(blob) = StreamBlob::try_open(self.client.clone(), &self.container, &name).await?
        else {
            return Ok(None);
        };

        let size: u64 = blob
            .metadata()
            .get(keys::SNAPSHOT_SIZE_BYTES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let revision: u32 = blob
            .metadata()
            .get(keys::SNAPSHOT_STREAM_REVISION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if size == 0 || revision > max_revision {
            return Ok(None);
        }

        let bytes = blob.download(0, size).await?;
        let snapshot = self
            .serializer
            .deserialize(&bytes)
            .map_err(|e| Error::Corrupt(format!("snapshot {}/{name}: {e}", self.container)))?;
        Ok(Some(snapshot))
    }
}
