//! Torn Write Recovery Tests
//!
//! These tests kill the page write after the descriptor rotation has already
//! reached metadata - the exact window the primary/fallback/tertiary protocol
//! exists for - and verify that readers see the pre-commit state and that a
//! retry lands cleanly.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use pagestream_core::{CommitAttempt, JsonSerializer};
use pagestream_storage::{
    BlobEventStore, BlobMetadata, BlobState, CheckpointEntry, CreateOutcome, ETag, Error,
    InMemoryPageBlobClient, PageBlobClient, StoreConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Delegating client that fails page writes while armed, simulating a crash
/// between the metadata update and the data write.
struct CrashingClient {
    inner: InMemoryPageBlobClient,
    fail_writes: AtomicBool,
}

impl CrashingClient {
    fn new() -> Self {
        Self {
            inner: InMemoryPageBlobClient::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.fail_writes.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageBlobClient for CrashingClient {
    async fn set_connection_limit(&self, limit: usize) -> pagestream_storage::Result<()> {
        self.inner.set_connection_limit(limit).await
    }

    async fn create_container_if_missing(&self, container: &str) -> pagestream_storage::Result<()> {
        self.inner.create_container_if_missing(container).await
    }

    async fn list_containers(&self, prefix: &str) -> pagestream_storage::Result<Vec<String>> {
        self.inner.list_containers(prefix).await
    }

    async fn delete_container(&self, container: &str) -> pagestream_storage::Result<()> {
        self.inner.delete_container(container).await
    }

    async fn create_blob_if_missing(
        &self,
        container: &str,
        blob: &str,
        size_bytes: u64,
    ) -> pagestream_storage::Result<CreateOutcome> {
        self.inner.create_blob_if_missing(container, blob, size_bytes).await
    }

    async fn get_blob(
        &self,
        container: &str,
        blob: &str,
    ) -> pagestream_storage::Result<Option<BlobState>> {
        self.inner.get_blob(container, blob).await
    }

    async fn list_blobs(
        &self,
        container: &str,
        prefix: &str,
    ) -> pagestream_storage::Result<Vec<BlobState>> {
        self.inner.list_blobs(container, prefix).await
    }

    async fn read_range(
        &self,
        container: &str,
        blob: &str,
        start: u64,
        end: u64,
    ) -> pagestream_storage::Result<Bytes> {
        self.inner.read_range(container, blob, start, end).await
    }

    async fn write_pages(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        data: Bytes,
        if_match: &ETag,
    ) -> pagestream_storage::Result<ETag> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Transport("injected write failure".to_string()));
        }
        self.inner.write_pages(container, blob, offset, data, if_match).await
    }

    async fn resize_blob(
        &self,
        container: &str,
        blob: &str,
        new_size: u64,
        if_match: &ETag,
    ) -> pagestream_storage::Result<ETag> {
        self.inner.resize_blob(container, blob, new_size, if_match).await
    }

    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        metadata: BlobMetadata,
        if_match: &ETag,
    ) -> pagestream_storage::Result<ETag> {
        self.inner.set_metadata(container, blob, metadata, if_match).await
    }

    async fn increment_sequence(&self, container: &str, blob: &str) -> pagestream_storage::Result<u64> {
        self.inner.increment_sequence(container, blob).await
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> pagestream_storage::Result<()> {
        self.inner.delete_blob(container, blob).await
    }

    async fn insert_checkpoint_entry(
        &self,
        table: &str,
        entry: CheckpointEntry,
    ) -> pagestream_storage::Result<()> {
        self.inner.insert_checkpoint_entry(table, entry).await
    }
}

fn store_with_client() -> (BlobEventStore<JsonSerializer>, Arc<CrashingClient>) {
    let client = Arc::new(CrashingClient::new());
    let store = BlobEventStore::new(client.clone(), JsonSerializer, StoreConfig::default());
    (store, client)
}

fn attempt(stream: &str, sequence: u32, revision: u32, events: &[&str]) -> CommitAttempt {
    CommitAttempt {
        bucket_id: "b".to_string(),
        stream_id: stream.to_string(),
        commit_id: Uuid::new_v4(),
        commit_sequence: sequence,
        stream_revision: revision,
        commit_stamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        headers: HashMap::new(),
        events: events.iter().map(|e| Bytes::from(e.to_string())).collect(),
    }
}

#[tokio::test]
async fn test_torn_second_commit_recovers_previous_header() {
    let (store, client) = store_with_client();
    store.initialize().await.unwrap();

    let first = store.commit(attempt("s1", 1, 1, &["e0"])).await.unwrap();

    // The second commit rotates descriptors, then its page write dies.
    client.arm();
    let torn = attempt("s1", 2, 2, &["e1"]);
    let err = store.commit(torn.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    client.disarm();

    // Readers fall back to the previous header: only the first commit exists.
    let read = store.get_from_revision("b", "s1", 1, 2).await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].commit_id, first.commit_id);

    // A retry of the torn attempt lands and becomes observable.
    let retried = store.commit(torn).await.unwrap();
    assert!(retried.checkpoint > first.checkpoint);
    let read = store.get_from_revision("b", "s1", 1, 2).await.unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[1].commit_id, retried.commit_id);
}

#[tokio::test]
async fn test_torn_first_write_reads_as_empty_stream() {
    let (store, client) = store_with_client();
    store.initialize().await.unwrap();

    client.arm();
    let torn = attempt("s2", 1, 1, &["e0"]);
    assert!(store.commit(torn.clone()).await.is_err());
    client.disarm();

    // The reserved-but-never-completed first write is a no-op.
    assert!(store.get_from_revision("b", "s2", 1, 10).await.unwrap().is_empty());
    assert!(store.get_undispatched_commits().await.unwrap().is_empty());

    // Retrying the first write succeeds from scratch.
    let committed = store.commit(torn).await.unwrap();
    let read = store.get_from_revision("b", "s2", 1, 1).await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].commit_id, committed.commit_id);
}

#[tokio::test]
async fn test_torn_commit_does_not_surface_in_undispatched_scan() {
    let (store, client) = store_with_client();
    store.initialize().await.unwrap();

    let first = store.commit(attempt("s1", 1, 1, &["e0"])).await.unwrap();

    client.arm();
    assert!(store.commit(attempt("s1", 2, 2, &["e1"])).await.is_err());
    client.disarm();

    let pending = store.get_undispatched_commits().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].commit_id, first.commit_id);
}
