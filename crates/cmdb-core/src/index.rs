//! Index builders
//!
//! Each builder turns one unit's consistent snapshot into the field map
//! of a published hash. Hosts contribute to both, either, or neither
//! host key space depending on which identifiers are populated.

use std::collections::HashMap;

use cmdb_inventory::TopoTreeNode;

use crate::record::HostRecord;
use crate::topology::{self, TopoNodeSummary};

/// Host index entries: composite key and numeric id both map to one
/// serialization of the record, so dual-indexed payloads stay
/// byte-identical.
pub fn host_entries(hosts: &[HostRecord]) -> Result<HashMap<String, String>, serde_json::Error> {
    let mut entries = HashMap::new();
    for host in hosts {
        let value = serde_json::to_string(host)?;
        if let Some(key) = host.composite_key() {
            entries.insert(key, value.clone());
        }
        if let Some(key) = host.numeric_key() {
            entries.insert(key, value);
        }
    }
    Ok(entries)
}

/// Agent index entries: agent id → host id, hosts without an agent skipped
pub fn agent_entries(hosts: &[HostRecord]) -> HashMap<String, String> {
    hosts
        .iter()
        .filter(|host| !host.agent_id.is_empty())
        .map(|host| (host.agent_id.clone(), host.host_id.to_string()))
        .collect()
}

/// Topo index entries: one per node of a full pre-order traversal
pub fn topo_entries(root: &TopoTreeNode) -> Result<HashMap<String, String>, serde_json::Error> {
    let mut entries = HashMap::new();
    let mut failure = None;
    topology::traverse(root, &mut |node| {
        match serde_json::to_string(&TopoNodeSummary::from_node(node)) {
            Ok(value) => {
                entries.insert(node.node_key(), value);
            }
            Err(e) => failure = Some(e),
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(entries),
    }
}

/// This unit's contribution to the shared ip-ownership index:
/// `(ip, composite key)` per host with a known inner IP
pub fn ip_memberships(hosts: &[HostRecord]) -> Vec<(String, String)> {
    hosts
        .iter()
        .filter_map(|host| {
            host.composite_key()
                .map(|key| (host.inner_ip.clone(), key))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(ip: &str, cloud: i64, host_id: i64, agent: &str) -> HostRecord {
        HostRecord {
            inner_ip: ip.to_string(),
            ip: ip.to_string(),
            cloud_region_id: cloud,
            host_id,
            agent_id: agent.to_string(),
            ..HostRecord::default()
        }
    }

    #[test]
    fn test_dual_indexed_payloads_are_byte_identical() {
        let entries = host_entries(&[host("10.0.0.1", 0, 42, "")]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["10.0.0.1|0"], entries["42"]);
    }

    #[test]
    fn test_host_without_identifiers_contributes_nothing() {
        let entries = host_entries(&[host("", 0, 0, "")]).unwrap();
        assert!(entries.is_empty());

        // ip only: composite key space only
        let entries = host_entries(&[host("10.0.0.2", 1, 0, "")]).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("10.0.0.2|1"));
    }

    #[test]
    fn test_agent_entries_skip_empty_agent_ids() {
        let entries = agent_entries(&[
            host("10.0.0.1", 0, 42, "agent-a"),
            host("10.0.0.2", 0, 43, ""),
        ]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["agent-a"], "42");
    }

    #[test]
    fn test_ip_memberships_distinguish_cloud_regions() {
        let pairs = ip_memberships(&[
            host("10.0.0.1", 0, 1, ""),
            host("10.0.0.1", 1, 2, ""),
            host("", 0, 3, ""),
        ]);
        assert_eq!(pairs, vec![
            ("10.0.0.1".to_string(), "10.0.0.1|0".to_string()),
            ("10.0.0.1".to_string(), "10.0.0.1|1".to_string()),
        ]);
    }
}
