//! Engine configuration

use std::time::Duration;

use crate::error::CacheError;

/// Configuration for the cache manager
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Namespace prefix for every published key
    pub key_prefix: String,
    /// Expiration applied to published keys
    pub expire: Duration,
    /// Maximum number of concurrent unit refreshes
    pub concurrent_limit: usize,
    /// Deadline for one upstream call
    pub fetch_timeout: Duration,
    /// Deadline for one store call
    pub store_timeout: Duration,
    /// Page size for the upstream host listing
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cmdb".to_string(),
            expire: Duration::from_secs(24 * 3600),
            concurrent_limit: 5,
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
            page_size: 500,
        }
    }
}

impl EngineConfig {
    /// Validate construction-time constraints
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.key_prefix.is_empty() {
            return Err(CacheError::Configuration(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self.concurrent_limit == 0 {
            return Err(CacheError::Configuration(
                "concurrent_limit must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(CacheError::Configuration(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
