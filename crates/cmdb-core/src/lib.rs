//! CMDB Cache Core
//!
//! Synchronization engine keeping a derived snapshot of the host
//! inventory and its business topology inside a key-value store,
//! eventually consistent with the upstream configuration-management
//! source.

pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod manager;
pub mod record;
pub mod topology;

pub use config::EngineConfig;
pub use error::CacheError;
pub use events::{EventRecord, ResourceKind};
pub use manager::{
    AGENT_ID_KEY, CACHE_KEYS, HOST_IP_KEY, HOST_KEY, HostTopoCacheManager, TOPO_KEY,
};
pub use record::{HostRecord, composite_key, module_key};
pub use topology::TopoNodeSummary;
