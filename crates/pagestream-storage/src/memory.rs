//! In-Memory Page-Blob Backend
//!
//! A complete [`PageBlobClient`] over plain maps, with the same concurrency
//! semantics a real page-blob service enforces: per-blob etags bumped on every
//! mutation, stale-etag rejection, page-aligned writes, and an atomic
//! sequence number per blob.
//!
//! Used by every test in this workspace and suitable for embedding when no
//! real object store is available.

use crate::checkpoint::CheckpointEntry;
use crate::client::{BlobMetadata, BlobState, CreateOutcome, ETag, PageBlobClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use pagestream_core::pages;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct BlobRecord {
    data: Vec<u8>,
    metadata: BlobMetadata,
    etag: u64,
    sequence: u64,
}

#[derive(Default)]
struct State {
    /// container -> blob name -> record. BTreeMaps keep listings ordered.
    containers: BTreeMap<String, BTreeMap<String, BlobRecord>>,
    /// table name -> dispatch log rows.
    tables: BTreeMap<String, Vec<CheckpointEntry>>,
    /// Monotonic etag source shared by every blob.
    next_etag: u64,
}

impl State {
    fn next_etag(&mut self) -> u64 {
        self.next_etag += 1;
        self.next_etag
    }

    fn blob(&mut self, container: &str, blob: &str) -> Result<&mut BlobRecord> {
        self.containers
            .get_mut(container)
            .and_then(|c| c.get_mut(blob))
            .ok_or_else(|| Error::NotFound {
                container: container.to_string(),
                blob: blob.to_string(),
            })
    }
}

fn check_etag(record: &BlobRecord, if_match: &ETag) -> Result<()> {
    if record.etag != if_match.0 {
        return Err(Error::Concurrency(format!(
            "etag mismatch: have {}, expected {}",
            record.etag, if_match.0
        )));
    }
    Ok(())
}

/// In-memory implementation of [`PageBlobClient`].
#[derive(Default)]
pub struct InMemoryPageBlobClient {
    state: Mutex<State>,
}

impl InMemoryPageBlobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of a checkpoint table, for assertions in tests.
    pub async fn table_rows(&self, table: &str) -> Vec<CheckpointEntry> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn to_state(name: &str, record: &BlobRecord) -> BlobState {
    BlobState {
        name: name.to_string(),
        size_bytes: record.data.len() as u64,
        etag: ETag(record.etag),
        metadata: record.metadata.clone(),
    }
}

#[async_trait]
impl PageBlobClient for InMemoryPageBlobClient {
    async fn set_connection_limit(&self, _limit: usize) -> Result<()> {
        Ok(())
    }

    async fn create_container_if_missing(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.containers.remove(container);
        Ok(())
    }

    async fn create_blob_if_missing(
        &self,
        container: &str,
        blob: &str,
        size_bytes: u64,
    ) -> Result<CreateOutcome> {
        let mut state = self.state.lock().await;
        let etag = state.next_etag();
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Error::NotFound {
                container: container.to_string(),
                blob: blob.to_string(),
            })?;
        if blobs.contains_key(blob) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        blobs.insert(
            blob.to_string(),
            BlobRecord {
                data: vec![0u8; size_bytes as usize],
                metadata: BlobMetadata::new(),
                etag,
                sequence: 0,
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn get_blob(&self, container: &str, blob: &str) -> Result<Option<BlobState>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .get(container)
            .and_then(|c| c.get(blob))
            .map(|record| to_state(blob, record)))
    }

    async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<BlobState>> {
        let state = self.state.lock().await;
        let blobs = state.containers.get(container).ok_or_else(|| Error::NotFound {
            container: container.to_string(),
            blob: String::new(),
        })?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, record)| to_state(name, record))
            .collect())
    }

    async fn read_range(&self, container: &str, blob: &str, start: u64, end: u64) -> Result<Bytes> {
        let mut state = self.state.lock().await;
        let record = state.blob(container, blob)?;
        if start > end || end > record.data.len() as u64 {
            return Err(Error::Transport(format!(
                "range [{start}, {end}) out of bounds for blob of {} bytes",
                record.data.len()
            )));
        }
        Ok(Bytes::copy_from_slice(
            &record.data[start as usize..end as usize],
        ))
    }

    async fn write_pages(
        &self,
        container: &str,
        blob: &str,
        offset: u64,
        data: Bytes,
        if_match: &ETag,
    ) -> Result<ETag> {
        if offset % pages::PAGE_SIZE != 0 {
            return Err(Error::Transport(format!(
                "write offset {offset} is not page-aligned"
            )));
        }
        let mut state = self.state.lock().await;
        let etag = state.next_etag();
        let record = state.blob(container, blob)?;
        check_etag(record, if_match)?;

        let padded = pages::align_up(data.len() as u64);
        if offset + padded > record.data.len() as u64 {
            return Err(Error::Transport(format!(
                "write of {padded} bytes at {offset} exceeds blob of {} bytes",
                record.data.len()
            )));
        }
        record.data[offset as usize..offset as usize + data.len()].copy_from_slice(&data);
        // Zero the pad so the tail of the last page never carries stale bytes.
        record.data[offset as usize + data.len()..(offset + padded) as usize].fill(0);
        record.etag = etag;
        Ok(ETag(etag))
    }

    async fn resize_blob(
        &self,
        container: &str,
        blob: &str,
        new_size: u64,
        if_match: &ETag,
    ) -> Result<ETag> {
        if new_size % pages::PAGE_SIZE != 0 {
            return Err(Error::Transport(format!(
                "blob size {new_size} is not a page multiple"
            )));
        }
        let mut state = self.state.lock().await;
        let etag = state.next_etag();
        let record = state.blob(container, blob)?;
        check_etag(record, if_match)?;
        if new_size > record.data.len() as u64 {
            record.data.resize(new_size as usize, 0);
        }
        record.etag = etag;
        Ok(ETag(etag))
    }

    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        metadata: BlobMetadata,
        if_match: &ETag,
    ) -> Result<ETag> {
        let mut state = self.state.lock().await;
        let etag = state.next_etag();
        let record = state.blob(container, blob)?;
        check_etag(record, if_match)?;
        record.metadata = metadata;
        record.etag = etag;
        Ok(ETag(etag))
    }

    async fn increment_sequence(&self, container: &str, blob: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let record = state.blob(container, blob)?;
        record.sequence += 1;
        Ok(record.sequence)
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Error::NotFound {
                container: container.to_string(),
                blob: blob.to_string(),
            })?;
        blobs.remove(blob).ok_or_else(|| Error::NotFound {
            container: container.to_string(),
            blob: blob.to_string(),
        })?;
        Ok(())
    }

    async fn insert_checkpoint_entry(&self, table: &str, entry: CheckpointEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        let rows = state.tables.entry(table.to_string()).or_default();
        match rows.iter().position(|row| row.commit_id == entry.commit_id) {
            Some(i) => rows[i] = entry,
            None => rows.push(entry),
        }
        Ok(())
    }
}
