//! In-memory hash-map store backend
//!
//! Keeps every hash map in process memory. Used as the local backend of
//! the cache daemon and as the store double in tests. Expirations are
//! tracked per key and purged lazily on the next access.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::backend::HashStore;
use crate::error::StoreError;

/// In-memory hash-map store
#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<HashMap<String, HashMap<String, String>>>,
    deadlines: RwLock<HashMap<String, Instant>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a key whose expiration deadline has passed
    fn purge_expired(&self, key: &str) {
        let expired = {
            let deadlines = self.deadlines.read();
            deadlines.get(key).is_some_and(|d| *d <= Instant::now())
        };

        if expired {
            debug!("Purging expired key: {}", key);
            self.maps.write().remove(key);
            self.deadlines.write().remove(key);
        }
    }

    /// Number of fields currently stored under a key
    pub fn field_count(&self, key: &str) -> usize {
        self.purge_expired(key);
        self.maps.read().get(key).map(|m| m.len()).unwrap_or(0)
    }

    /// Copy of the full hash map under a key
    pub fn dump(&self, key: &str) -> HashMap<String, String> {
        self.purge_expired(key);
        self.maps.read().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn put_fields(
        &self,
        key: &str,
        fields: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        self.purge_expired(key);
        let mut maps = self.maps.write();
        maps.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn delete_fields(&self, key: &str, fields: &[String]) -> Result<(), StoreError> {
        self.purge_expired(key);
        let mut maps = self.maps.write();
        if let Some(map) = maps.get_mut(key) {
            for field in fields {
                map.remove(field);
            }
        }
        Ok(())
    }

    async fn get_fields(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError> {
        self.purge_expired(key);
        let maps = self.maps.read();
        let map = maps.get(key);
        Ok(fields
            .iter()
            .map(|f| map.and_then(|m| m.get(f).cloned()))
            .collect())
    }

    async fn field_names(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.purge_expired(key);
        let maps = self.maps.read();
        Ok(maps
            .get(key)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut deadlines = self.deadlines.write();
        deadlines.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}
