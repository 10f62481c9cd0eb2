//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] cmdb_inventory::UpstreamError),

    #[error("Store error: {0}")]
    Store(#[from] cmdb_store::StoreError),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(&'static str),
}
