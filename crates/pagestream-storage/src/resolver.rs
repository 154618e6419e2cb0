//! Header Resolution
//!
//! A commit updates blob pages and blob metadata in separate requests, and
//! either can fail or be torn. The resolver's job is to always find the newest
//! fully written header by walking the three descriptor slots in order:
//!
//! 1. **primary** - where the most recent write intended the header to be
//! 2. **fallback** - the previous committed descriptor
//! 3. **tertiary** - the previous descriptor re-pointed at the new offset
//!
//! The first slot whose bytes deserialize wins, and the descriptor that won
//! becomes the "last good" descriptor the next write rotates from. A stream
//! with no primary descriptor at all is fresh; a stream whose slots all fail
//! but whose first write never completed reads as empty; anything else is
//! `InvalidHeaderData` and needs an operator.
//!
//! Note the tertiary slot is written *before* the data write it describes: if
//! that write never happens the slot points at unwritten pages, deserialization
//! fails, and resolution falls through - that is the intended shape of the
//! safety net, not an error.

use crate::blob::{DescriptorSlot, StreamBlob};
use crate::error::{Error, Result};
use pagestream_core::{HeaderDefinition, Serializer, StreamBlobHeader};

/// A header plus the descriptor it was read through.
#[derive(Debug, Clone)]
pub struct ResolvedHeader {
    pub header: StreamBlobHeader,
    pub descriptor: HeaderDefinition,
}

impl ResolvedHeader {
    fn empty() -> Self {
        Self {
            header: StreamBlobHeader::default(),
            descriptor: HeaderDefinition::default(),
        }
    }
}

/// Locate the last good header of `blob`.
pub async fn resolve<S: Serializer>(blob: &StreamBlob, serializer: &S) -> Result<ResolvedHeader> {
    // No primary descriptor was ever reserved: fresh stream.
    if blob.metadata().get(DescriptorSlot::Primary.key()).is_none() {
        return Ok(ResolvedHeader::empty());
    }

    let mut last_failure = None;

    for slot in DescriptorSlot::RESOLUTION_ORDER {
        let descriptor = match blob.header_definition(slot) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(blob = %blob.name(), ?slot, error = %e, "descriptor undecodable");
                last_failure = Some(e.to_string());
                continue;
            }
        };
        if descriptor.is_empty() {
            continue;
        }

        let end = descriptor.start_offset.saturating_add(descriptor.size as u64);
        if end > blob.size_bytes() {
            tracing::debug!(
                blob = %blob.name(),
                ?slot,
                offset = descriptor.start_offset,
                size = descriptor.size,
                "descriptor points past blob end"
            );
            last_failure = Some(format!("{slot:?} descriptor past blob end"));
            continue;
        }

        let bytes = blob.download(descriptor.start_offset, end).await?;
        match serializer.deserialize::<StreamBlobHeader>(&bytes) {
            Ok(header) => {
                if slot != DescriptorSlot::Primary {
                    tracing::debug!(blob = %blob.name(), ?slot, "recovered header from non-primary slot");
                }
                return Ok(ResolvedHeader { header, descriptor });
            }
            Err(e) => {
                tracing::debug!(blob = %blob.name(), ?slot, error = %e, "header bytes do not parse");
                last_failure = Some(e.to_string());
            }
        }
    }

    // A reserved-but-never-completed first write leaves nothing to recover.
    if blob.first_write_pending() {
        return Ok(ResolvedHeader::empty());
    }

    tracing::error!(blob = %blob.name(), "no descriptor slot yields a parseable header");
    Err(Error::InvalidHeaderData(format!(
        "blob {}: no descriptor slot yields a parseable header (last failure: {})",
        blob.name(),
        last_failure.unwrap_or_else(|| "none recorded".to_string())
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::keys;
    use crate::client::{BlobMetadata, PageBlobClient};
    use crate::memory::InMemoryPageBlobClient;
    use bytes::Bytes;
    use pagestream_core::JsonSerializer;
    use std::sync::Arc;

    const CONTAINER: &str = "evsrctest";
    const BLOB: &str = "b/s1";

    struct Fixture {
        client: Arc<InMemoryPageBlobClient>,
    }

    impl Fixture {
        async fn new() -> Self {
            let client = Arc::new(InMemoryPageBlobClient::new());
            client.create_container_if_missing(CONTAINER).await.unwrap();
            client
                .create_blob_if_missing(CONTAINER, BLOB, 8192)
                .await
                .unwrap();
            Self { client }
        }

        /// Write a valid serialized header at `offset` and return its descriptor.
        async fn plant_header(&self, offset: u64, sequence: u32) -> HeaderDefinition {
            let mut header = StreamBlobHeader::default();
            header.last_commit_sequence = sequence;
            let bytes = JsonSerializer.serialize(&header).unwrap();
            let descriptor = HeaderDefinition::new(offset, bytes.len() as u32);

            // Headers land mid-page in production; write the containing page.
            let page_start = pagestream_core::pages::page_floor(offset);
            let mut buf = vec![0u8; (offset - page_start) as usize];
            buf.extend_from_slice(&bytes);
            let state = self.client.get_blob(CONTAINER, BLOB).await.unwrap().unwrap();
            self.client
                .write_pages(CONTAINER, BLOB, page_start, Bytes::from(buf), &state.etag)
                .await
                .unwrap();
            descriptor
        }

        async fn set_slots(&self, slots: &[(&str, String)]) {
            let state = self.client.get_blob(CONTAINER, BLOB).await.unwrap().unwrap();
            let mut metadata = BlobMetadata::new();
            for (key, value) in slots {
                metadata.insert(key.to_string(), value.clone());
            }
            self.client
                .set_metadata(CONTAINER, BLOB, metadata, &state.etag)
                .await
                .unwrap();
        }

        async fn blob(&self) -> StreamBlob {
            StreamBlob::open(self.client.clone(), CONTAINER, BLOB)
                .await
                .unwrap()
        }
    }

    // ---------------------------------------------------------------
    // Fresh and empty streams
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_no_primary_descriptor_means_fresh_stream() {
        let fixture = Fixture::new().await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header, StreamBlobHeader::default());
        assert!(resolved.descriptor.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_first_write_reads_as_empty() {
        let fixture = Fixture::new().await;
        // Primary points at pages nobody wrote; first write still pending.
        let bogus = HeaderDefinition::new(1024, 64);
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, bogus.encode()),
                (keys::FIRST_WRITE_COMPLETED, "f".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header, StreamBlobHeader::default());
    }

    // ---------------------------------------------------------------
    // Slot walk
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_valid_primary_wins() {
        let fixture = Fixture::new().await;
        let descriptor = fixture.plant_header(700, 3).await;
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, descriptor.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header.last_commit_sequence, 3);
        assert_eq!(resolved.descriptor, descriptor);
    }

    #[tokio::test]
    async fn test_torn_primary_falls_back() {
        let fixture = Fixture::new().await;
        let good = fixture.plant_header(700, 2).await;
        // Primary points at provisioned-but-unwritten pages.
        let torn = HeaderDefinition::new(4096, good.size);
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, torn.encode()),
                (keys::FALLBACK_HEADER_DEFINITION, good.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header.last_commit_sequence, 2);
        assert_eq!(resolved.descriptor, good);
    }

    #[tokio::test]
    async fn test_tertiary_is_last_resort() {
        let fixture = Fixture::new().await;
        let good = fixture.plant_header(700, 5).await;
        let torn = HeaderDefinition::new(4096, good.size);
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, torn.encode()),
                (keys::FALLBACK_HEADER_DEFINITION, "not-a-descriptor".to_string()),
                (keys::TERTIARY_HEADER_DEFINITION, good.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header.last_commit_sequence, 5);
        assert_eq!(resolved.descriptor, good);
    }

    #[tokio::test]
    async fn test_zero_size_slots_are_skipped() {
        let fixture = Fixture::new().await;
        let good = fixture.plant_header(700, 1).await;
        fixture
            .set_slots(&[
                (
                    keys::PRIMARY_HEADER_DEFINITION,
                    HeaderDefinition::default().encode(),
                ),
                (keys::FALLBACK_HEADER_DEFINITION, good.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.descriptor, good);
    }

    #[tokio::test]
    async fn test_descriptor_past_blob_end_is_skipped() {
        let fixture = Fixture::new().await;
        let good = fixture.plant_header(700, 4).await;
        let past_end = HeaderDefinition::new(1 << 32, 64);
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, past_end.encode()),
                (keys::FALLBACK_HEADER_DEFINITION, good.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let resolved = resolve(&fixture.blob().await, &JsonSerializer).await.unwrap();
        assert_eq!(resolved.header.last_commit_sequence, 4);
    }

    // ---------------------------------------------------------------
    // Corruption
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_all_slots_dead_is_invalid_header_data() {
        let fixture = Fixture::new().await;
        let torn = HeaderDefinition::new(4096, 64);
        fixture
            .set_slots(&[
                (keys::PRIMARY_HEADER_DEFINITION, torn.encode()),
                (keys::FIRST_WRITE_COMPLETED, "t".to_string()),
            ])
            .await;
        let err = resolve(&fixture.blob().await, &JsonSerializer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderData(_)));
    }
}
