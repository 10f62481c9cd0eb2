//! Incremental change events
//!
//! Upstream change notifications arrive as loosely-typed field maps.
//! Each resource kind parses into its own variant with explicit
//! required fields; records missing them are skipped, never asserted.

use serde_json::Value;

use crate::record::composite_key;
use crate::topology::TopoNodeSummary;

/// One raw change notification
pub type EventRecord = serde_json::Map<String, Value>;

/// Resource kind tag of an event batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Host,
    Topology,
    HostRelation,
}

impl ResourceKind {
    /// Parse the resource kind tag carried by the event stream
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "host" => Some(Self::Host),
            "topology" | "mainline_instance" => Some(Self::Topology),
            "host_relation" => Some(Self::HostRelation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Topology => "topology",
            Self::HostRelation => "host_relation",
        }
    }
}

/// Numeric event fields may arrive as integers or floats
fn num_field(event: &EventRecord, name: &str) -> Option<i64> {
    let value = event.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

fn str_field(event: &EventRecord, name: &str) -> Option<String> {
    event
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A host change event
///
/// Requires at least one identifying field: a positive host id, a
/// non-empty agent id, or an inner IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub host_id: Option<i64>,
    pub agent_id: Option<String>,
    pub inner_ip: Option<String>,
    pub cloud_region_id: i64,
}

impl HostEvent {
    pub fn parse(event: &EventRecord) -> Option<Self> {
        let host_id = num_field(event, "host_id").filter(|id| *id > 0);
        let agent_id = str_field(event, "agent_id").filter(|id| !id.is_empty());
        let inner_ip = str_field(event, "inner_ip").filter(|ip| !ip.is_empty());
        let cloud_region_id = num_field(event, "cloud_region_id").unwrap_or(0);

        if host_id.is_none() && agent_id.is_none() && inner_ip.is_none() {
            return None;
        }
        Some(Self {
            host_id,
            agent_id,
            inner_ip,
            cloud_region_id,
        })
    }

    /// Host index fields this event identifies
    pub fn host_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(ip) = &self.inner_ip {
            keys.push(composite_key(ip, self.cloud_region_id));
        }
        if let Some(id) = self.host_id {
            keys.push(id.to_string());
        }
        keys
    }
}

/// A topology node change event; requires the node kind and instance id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEvent {
    pub obj_id: String,
    pub obj_name: String,
    pub inst_id: i64,
    pub inst_name: String,
}

impl TopologyEvent {
    pub fn parse(event: &EventRecord) -> Option<Self> {
        let obj_id = str_field(event, "obj_id").filter(|id| !id.is_empty())?;
        let inst_id = num_field(event, "inst_id")?;
        Some(Self {
            obj_id,
            obj_name: str_field(event, "obj_name").unwrap_or_default(),
            inst_id,
            inst_name: str_field(event, "inst_name").unwrap_or_default(),
        })
    }

    /// Topo index field this event upserts
    pub fn node_key(&self) -> String {
        format!("{}|{}", self.obj_id, self.inst_id)
    }

    pub fn summary(&self) -> TopoNodeSummary {
        TopoNodeSummary {
            inst_id: self.inst_id,
            inst_name: self.inst_name.clone(),
            obj_id: self.obj_id.clone(),
            obj_name: self.obj_name.clone(),
        }
    }
}

/// A host-membership change event; requires the owning unit id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationEvent {
    pub unit_id: i64,
}

impl RelationEvent {
    pub fn parse(event: &EventRecord) -> Option<Self> {
        num_field(event, "unit_id").map(|unit_id| Self { unit_id })
    }
}
