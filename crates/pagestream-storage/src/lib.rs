//! PageStream Storage Engine
//!
//! This crate implements the persistence engine for PageStream - an
//! append-only, event-sourced commit store on top of cloud page blobs.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────┐
//! │ event-sourcing      │
//! │ framework           │
//! └─────────┬───────────┘
//!           │ commit / query / dispatch / snapshot
//!           ▼
//! ┌─────────────────────┐     ┌──────────────────────┐
//! │ BlobEventStore      │ ──► │ CheckpointAllocator  │
//! │ - commit engine     │     │ ($root/checkpoint)   │
//! │ - header resolver   │     └──────────────────────┘
//! │ - dispatch tracker  │
//! │ - snapshot store    │
//! │ - query layer       │
//! └─────────┬───────────┘
//!           │ PageBlobClient
//!           ▼
//! ┌─────────────────────┐
//! │ object store        │  one page blob per stream,
//! │ (page blobs + etags)│  "evsrc<name>" container
//! └─────────────────────┘
//! ```
//!
//! ## Main Components
//!
//! ### BlobEventStore
//! The engine facade. Appends commits with optimistic concurrency, recovers
//! the last good header after torn writes, tracks at-least-once dispatch,
//! stores snapshots, and serves range queries.
//!
//! ### PageBlobClient
//! The typed object-store surface the engine consumes: page blobs addressed
//! in 512-byte units, per-blob metadata maps with etag preconditions, an
//! atomic per-blob sequence number, and the dispatch log table.
//! [`memory::InMemoryPageBlobClient`] implements it for tests and embedding.
//!
//! ## Usage
//!
//! ```ignore
//! use pagestream_core::{CommitAttempt, JsonSerializer};
//! use pagestream_storage::{BlobEventStore, InMemoryPageBlobClient, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = BlobEventStore::new(
//!     Arc::new(InMemoryPageBlobClient::new()),
//!     JsonSerializer,
//!     StoreConfig::default(),
//! );
//! store.initialize().await?;
//!
//! let commit = store.commit(attempt).await?;
//! let commits = store.get_from_revision("bucket", "stream", 1, u32::MAX).await?;
//! ```
//!
//! ## Concurrency Model
//!
//! Caller-driven: every operation is an awaited future, the engine spawns no
//! tasks and holds no lock across network calls. Mutation ordering is
//! delegated to the object store through etag preconditions, so the store is
//! safe to share across tasks behind an `Arc`.

pub mod blob;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod memory;
pub mod query;
pub mod resolver;
pub mod snapshot;

pub use blob::{DescriptorSlot, StreamBlob};
pub use checkpoint::{CheckpointAllocator, CheckpointEntry};
pub use client::{BlobMetadata, BlobState, CreateOutcome, ETag, PageBlobClient};
pub use config::StoreConfig;
pub use engine::BlobEventStore;
pub use error::{Error, Result};
pub use memory::InMemoryPageBlobClient;
pub use resolver::ResolvedHeader;
