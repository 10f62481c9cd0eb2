//! Canonical host record and its normalizer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use cmdb_inventory::HostWithTopo;

use crate::topology::TopoNodeSummary;

/// Canonical cached host entity
///
/// Built from one raw upstream host-with-topology record, then enriched
/// by the fetch step with the resolved cloud-region name and the
/// per-module topology links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRecord {
    pub unit_id: i64,
    pub host_id: i64,
    pub agent_id: String,
    pub ip: String,
    pub inner_ip: String,
    pub inner_ip_v6: String,
    pub outer_ip: String,
    pub outer_ip_v6: String,
    pub host_name: String,
    pub display_name: String,
    pub cloud_region_id: i64,
    pub cloud_region_name: String,
    pub operators: Vec<String>,
    pub backup_operators: Vec<String>,
    pub set_ids: Vec<i64>,
    pub module_ids: Vec<i64>,
    /// Module key → root-to-module ancestor chain
    pub topo_links: BTreeMap<String, Vec<TopoNodeSummary>>,
    pub os_name: String,
    pub os_type: String,
    pub os_version: String,
    pub state: String,
    pub state_name: String,
    pub service_status: String,
    pub comment: String,
    pub memory: Option<i64>,
    pub disk: Option<i64>,
    pub cpu: Option<i64>,
}

/// Composite key identifying a host within one cloud region
pub fn composite_key(ip: &str, cloud_region_id: i64) -> String {
    format!("{}|{}", ip, cloud_region_id)
}

/// Field name a module's topology link is cached under
pub fn module_key(module_id: i64) -> String {
    format!("module|{}", module_id)
}

/// Split a comma-separated account list; empty input yields an empty list
fn split_accounts(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_string).collect()
}

impl HostRecord {
    /// Normalize one raw upstream record
    ///
    /// Pure and total: missing upstream fields fall back to zero values.
    pub fn from_raw(info: &HostWithTopo) -> Self {
        let host = &info.host;

        let mut set_ids = Vec::new();
        let mut module_ids = Vec::new();
        for path in &info.topo {
            set_ids.push(path.set_id);
            for module in &path.modules {
                module_ids.push(module.module_id);
            }
        }

        // display name priority: inner IPv4, host name, inner IPv6
        let display_name = if !host.inner_ip.is_empty() {
            host.inner_ip.clone()
        } else if !host.host_name.is_empty() {
            host.host_name.clone()
        } else {
            host.inner_ip_v6.clone()
        };

        // effective state priority: service status, then legacy state
        let service_status = host.service_status.clone().unwrap_or_default();
        let state = if !service_status.is_empty() {
            service_status.clone()
        } else {
            host.state.clone().unwrap_or_default()
        };

        Self {
            unit_id: 0,
            host_id: host.host_id,
            agent_id: host.agent_id.clone(),
            ip: host.inner_ip.clone(),
            inner_ip: host.inner_ip.clone(),
            inner_ip_v6: host.inner_ip_v6.clone(),
            outer_ip: host.outer_ip.clone(),
            outer_ip_v6: host.outer_ip_v6.clone(),
            host_name: host.host_name.clone(),
            display_name,
            cloud_region_id: host.cloud_region_id,
            cloud_region_name: String::new(),
            operators: split_accounts(&host.operator),
            backup_operators: split_accounts(&host.backup_operator),
            set_ids,
            module_ids,
            topo_links: BTreeMap::new(),
            os_name: host.os_name.clone(),
            os_type: host.os_type.clone(),
            os_version: host.os_version.clone(),
            state,
            state_name: host.state_name.clone().unwrap_or_default(),
            service_status,
            comment: host.comment.clone(),
            memory: host.memory,
            disk: host.disk,
            cpu: host.cpu,
        }
    }

    /// Composite index key, present when the inner IP is known
    pub fn composite_key(&self) -> Option<String> {
        if self.inner_ip.is_empty() {
            return None;
        }
        Some(composite_key(&self.inner_ip, self.cloud_region_id))
    }

    /// Numeric index key, present when the host id has been assigned
    pub fn numeric_key(&self) -> Option<String> {
        if self.host_id <= 0 {
            return None;
        }
        Some(self.host_id.to_string())
    }
}
