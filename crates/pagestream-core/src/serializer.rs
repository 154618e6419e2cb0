//! Payload Serializer Seam
//!
//! The store does not prescribe a wire format for commits, headers or
//! snapshots - the surrounding framework supplies one. [`Serializer`] is that
//! seam; [`JsonSerializer`] is the provided implementation and the one every
//! test uses.
//!
//! The trait's methods are generic, so the engine is generic over
//! `S: Serializer` rather than holding a trait object.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// In-memory <-> bytes codec for everything the store persists.
pub trait Serializer: Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// `serde_json`-backed serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
