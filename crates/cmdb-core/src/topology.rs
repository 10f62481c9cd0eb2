//! Topology tree helpers
//!
//! Link computation walks the per-unit topology tree and records, for
//! every module, the ordered ancestor chain from the business root down
//! to the module itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use cmdb_inventory::{InternalContainers, TopoTreeNode};

/// Node kind of the business root
pub const OBJ_BIZ: &str = "biz";
/// Node kind of a set
pub const OBJ_SET: &str = "set";
/// Node kind of a module
pub const OBJ_MODULE: &str = "module";

/// Serialized view of one topology node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoNodeSummary {
    pub inst_id: i64,
    pub inst_name: String,
    pub obj_id: String,
    pub obj_name: String,
}

impl TopoNodeSummary {
    /// Summarize one tree node
    pub fn from_node(node: &TopoTreeNode) -> Self {
        Self {
            inst_id: node.inst_id,
            inst_name: node.inst_name.clone(),
            obj_id: node.obj_id.clone(),
            obj_name: node.obj_name.clone(),
        }
    }
}

/// Append the unit's built-in containers to the tree
///
/// The generic topology query excludes built-in containers, so a
/// synthetic set node (with its module children) is injected under the
/// business root before links are computed.
pub fn attach_internal_containers(root: &mut TopoTreeNode, containers: &InternalContainers) {
    let set_node = TopoTreeNode {
        obj_id: OBJ_SET.to_string(),
        obj_name: "Set".to_string(),
        inst_id: containers.set_id,
        inst_name: containers.set_name.clone(),
        children: containers
            .modules
            .iter()
            .map(|module| TopoTreeNode {
                obj_id: OBJ_MODULE.to_string(),
                obj_name: "Module".to_string(),
                inst_id: module.module_id,
                inst_name: module.module_name.clone(),
                children: Vec::new(),
            })
            .collect(),
    };
    root.children.push(set_node);
}

/// Visit every node of the tree exactly once, depth-first pre-order
pub fn traverse<F: FnMut(&TopoTreeNode)>(node: &TopoTreeNode, visit: &mut F) {
    visit(node);
    for child in &node.children {
        traverse(child, visit);
    }
}

/// Compute the root-to-module ancestor chain for every module in the tree
///
/// Instance ids are unique within one tree, so each module id maps to
/// exactly one chain.
pub fn module_topo_links(root: &TopoTreeNode) -> HashMap<i64, Vec<TopoNodeSummary>> {
    let mut links = HashMap::new();
    let mut chain = Vec::new();
    collect_links(root, &mut chain, &mut links);
    links
}

fn collect_links(
    node: &TopoTreeNode,
    chain: &mut Vec<TopoNodeSummary>,
    links: &mut HashMap<i64, Vec<TopoNodeSummary>>,
) {
    chain.push(TopoNodeSummary::from_node(node));
    if node.obj_id == OBJ_MODULE {
        links.insert(node.inst_id, chain.clone());
    }
    for child in &node.children {
        collect_links(child, chain, links);
    }
    chain.pop();
}
