//! Core Error Types
//!
//! Errors raised by the codecs in this crate. The storage engine wraps these
//! in its own error type; see `pagestream-storage`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid header definition: {0}")]
    InvalidHeaderDefinition(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
