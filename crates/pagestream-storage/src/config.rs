//! Store Configuration
//!
//! ## Recognized Options
//!
//! - **container_name**: lowercase tail of the container holding every stream
//!   blob; the full container name is `"evsrc" + lowercase(container_name)`
//! - **blob_num_pages**: initial provisioning of each stream blob, in
//!   512-byte pages. Blobs grow by resize when a commit would not fit, so this
//!   only sets the first allocation (default: 128 pages = 64 KiB)
//! - **parallel_connection_limit**: pushed into the object-store client's
//!   connection pool on first `initialize()`
//!
//! ## Usage
//!
//! ```ignore
//! use pagestream_storage::StoreConfig;
//!
//! let config = StoreConfig {
//!     container_name: "Orders".to_string(),
//!     ..Default::default()
//! };
//! assert_eq!(config.container(), "evsrcorders");
//! ```

use pagestream_core::pages;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lowercase tail of the stream container name.
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Initial stream blob provisioning in 512-byte pages.
    #[serde(default = "default_blob_num_pages")]
    pub blob_num_pages: u32,

    /// Connection-pool limit applied at first initialize.
    #[serde(default = "default_connection_limit")]
    pub parallel_connection_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            blob_num_pages: default_blob_num_pages(),
            parallel_connection_limit: default_connection_limit(),
        }
    }
}

impl StoreConfig {
    /// Full container name holding every stream blob.
    pub fn container(&self) -> String {
        format!("evsrc{}", self.container_name.to_lowercase())
    }

    /// Initial stream blob size in bytes.
    pub fn initial_blob_size(&self) -> u64 {
        self.blob_num_pages as u64 * pages::PAGE_SIZE
    }
}

fn default_container_name() -> String {
    "commits".to_string()
}

fn default_blob_num_pages() -> u32 {
    128 // 64 KiB: enough for a handful of small commits before the first resize
}

fn default_connection_limit() -> usize {
    10
}
