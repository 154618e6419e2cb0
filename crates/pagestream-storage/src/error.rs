//! Storage Error Types
//!
//! This module defines all error kinds surfaced by the storage engine.
//!
//! ## Error Categories
//!
//! ### Commit Errors
//! - `DuplicateCommit`: the commit id is already present in the stream header
//! - `Concurrency`: an optimistic-concurrency check failed - stale etag on a
//!   metadata or page write, or a non-advancing commit sequence. Callers may
//!   retry the whole operation after refreshing state.
//!
//! ### Integrity Errors
//! - `InvalidHeaderData`: no header descriptor slot yields a parseable header
//!   and the stream is not a reserved-but-never-completed first write. Fatal
//!   for the stream; requires operator action.
//! - `Corrupt`: a commit or snapshot payload fails to deserialize. Fatal for
//!   that payload.
//!
//! ### Object-Store Errors
//! - `NotFound`: a blob is absent where existence was asserted
//! - `Transport`: any other object-store failure, propagated
//!
//! ## Propagation Policy
//!
//! Every error is raised to the caller. The engine retries only inside the
//! undispatched-commit scan (bounded) and nowhere else.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate commit: {commit_id}")]
    DuplicateCommit { commit_id: Uuid },

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("invalid header data: {0}")]
    InvalidHeaderData(String),

    #[error("corrupt payload: {0}")]
    Corrupt(String),

    #[error("not found: {container}/{blob}")]
    NotFound { container: String, blob: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Core(#[from] pagestream_core::Error),
}

impl Error {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Error::Concurrency(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
