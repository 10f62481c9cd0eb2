//! Upstream record types
//!
//! Every field defaults when absent so partially-projected upstream
//! records still decode.

use serde::{Deserialize, Serialize};

/// A business unit (top-level inventory partition)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessUnit {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// Raw host attributes as returned by the inventory source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHost {
    pub host_id: i64,
    pub inner_ip: String,
    pub inner_ip_v6: String,
    pub outer_ip: String,
    pub outer_ip_v6: String,
    pub host_name: String,
    pub agent_id: String,
    pub cloud_region_id: i64,
    /// Comma-separated account names
    pub operator: String,
    /// Comma-separated account names
    pub backup_operator: String,
    pub os_name: String,
    pub os_type: String,
    pub os_version: String,
    pub state: Option<String>,
    pub state_name: Option<String>,
    pub service_status: Option<String>,
    pub comment: String,
    pub memory: Option<i64>,
    pub disk: Option<i64>,
    pub cpu: Option<i64>,
}

/// Reference to a module within a topology path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleRef {
    pub module_id: i64,
    pub module_name: String,
}

/// One set with the modules the host belongs to underneath it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoPath {
    pub set_id: i64,
    pub set_name: String,
    pub modules: Vec<ModuleRef>,
}

/// A host together with its topology placement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostWithTopo {
    pub host: RawHost,
    pub topo: Vec<TopoPath>,
}

/// One page of a host listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPage {
    /// Total number of hosts in the unit, not just this page
    pub count: usize,
    pub hosts: Vec<HostWithTopo>,
}

/// A cloud region (id plus display name)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudRegion {
    pub id: i64,
    pub name: String,
}

/// A node of the business topology tree
///
/// `obj_id` carries the node kind (`biz`, `set`, `module`, or a custom
/// mainline level), `obj_name` its display name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoTreeNode {
    pub obj_id: String,
    pub obj_name: String,
    pub inst_id: i64,
    pub inst_name: String,
    pub children: Vec<TopoTreeNode>,
}

impl TopoTreeNode {
    /// Stable node identifier used as the topo index field name
    pub fn node_key(&self) -> String {
        format!("{}|{}", self.obj_id, self.inst_id)
    }
}

/// Built-in containers of a unit, excluded from the generic topology query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalContainers {
    pub set_id: i64,
    pub set_name: String,
    pub modules: Vec<ModuleRef>,
}
