//! Hash-map store trait

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreError;

/// Hash-map store trait
///
/// Implementations of this trait expose named hash maps with
/// field-granular reads and writes. Writes have merge semantics:
/// fields not included in a call are left untouched.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Overwrite a set of fields in a named hash map
    async fn put_fields(
        &self,
        key: &str,
        fields: HashMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Delete a set of fields from a named hash map
    async fn delete_fields(&self, key: &str, fields: &[String]) -> Result<(), StoreError>;

    /// Read a set of fields; missing fields come back as `None` positionally
    async fn get_fields(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError>;

    /// List all field names of a hash map
    async fn field_names(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Set the expiration of a whole key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}
