//! CMDB inventory upstream client
//!
//! Typed view of the configuration-management source the cache engine
//! synchronizes from: business units, hosts with their topology paths,
//! cloud regions, and the per-unit topology tree.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpInventoryClient, InventoryClientConfig, InventorySource, HOST_FIELDS};
pub use error::UpstreamError;
pub use types::{
    BusinessUnit, CloudRegion, HostPage, HostWithTopo, InternalContainers, ModuleRef, RawHost,
    TopoPath, TopoTreeNode,
};
