//! Core Types for PageStream
//!
//! This crate defines the data model shared by every layer of PageStream - an
//! append-only, event-sourced commit store layered on top of cloud page blobs.
//!
//! ## The Storage Model
//!
//! Each aggregate stream owns one page blob. Commits are appended to the blob
//! as opaque serialized payloads, and a serialized [`StreamBlobHeader`]
//! describing every commit follows the payloads:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────┬─────────┐
//! │ commit 0 │ commit 1 │ commit 2 │ StreamBlobHeader │ (zeros) │
//! └──────────┴──────────┴──────────┴─────────────────┴─────────┘
//!   page 0..3  page 4..5  page 6..9  ↑
//!                                    located via HeaderDefinition
//!                                    descriptors in blob metadata
//! ```
//!
//! Payloads occupy disjoint page-aligned spans; the header is rewritten after
//! every commit and every dispatch flip. A tiny [`HeaderDefinition`]
//! descriptor (offset + size, base64-packed) stored in blob metadata names
//! where the current header lives.
//!
//! ## What Lives Here
//!
//! - [`Commit`] / [`CommitAttempt`]: the unit of appended data
//! - [`CommitDefinition`] / [`StreamBlobHeader`]: the per-blob index
//! - [`HeaderDefinition`]: the fixed-format metadata descriptor
//! - [`Snapshot`]: the latest materialized state of a stream
//! - [`Serializer`]: the pluggable payload codec seam
//! - [`pages`]: 512-byte page arithmetic
//!
//! No I/O happens in this crate. The storage engine lives in
//! `pagestream-storage`.

pub mod commit;
pub mod error;
pub mod header;
pub mod pages;
pub mod serializer;
pub mod snapshot;

pub use commit::{Commit, CommitAttempt};
pub use error::{Error, Result};
pub use header::{CommitDefinition, HeaderDefinition, StreamBlobHeader};
pub use serializer::{JsonSerializer, Serializer};
pub use snapshot::Snapshot;
