//! Inventory source trait and HTTP client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::error::UpstreamError;
use crate::types::{
    BusinessUnit, CloudRegion, HostPage, InternalContainers, TopoTreeNode,
};

/// Host attribute projection requested from the inventory source
pub const HOST_FIELDS: &[&str] = &[
    "host_id",
    "inner_ip",
    "inner_ip_v6",
    "outer_ip",
    "outer_ip_v6",
    "host_name",
    "agent_id",
    "cloud_region_id",
    "operator",
    "backup_operator",
    "os_name",
    "os_type",
    "os_version",
    "state",
    "state_name",
    "service_status",
    "comment",
    "memory",
    "disk",
    "cpu",
];

/// Inventory source trait
///
/// The authoritative configuration-management API the cache engine
/// synchronizes from. Host listing is paginated; the caller drives the
/// page loop.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// List all business units
    async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, UpstreamError>;

    /// List one page of hosts (with topology paths) for a unit
    async fn list_hosts_with_topo(
        &self,
        unit_id: i64,
        fields: &[&str],
        start: usize,
        limit: usize,
    ) -> Result<HostPage, UpstreamError>;

    /// List all cloud regions
    async fn list_cloud_regions(&self) -> Result<Vec<CloudRegion>, UpstreamError>;

    /// Get the full topology tree of a unit, rooted at its business node
    async fn topology_tree(&self, unit_id: i64) -> Result<TopoTreeNode, UpstreamError>;

    /// Get the unit's built-in containers (excluded from the generic tree)
    async fn internal_containers(
        &self,
        unit_id: i64,
    ) -> Result<InternalContainers, UpstreamError>;
}

/// Inventory client configuration
#[derive(Clone, Debug)]
pub struct InventoryClientConfig {
    /// Base URL of the inventory API
    pub base_url: String,
    /// Bearer token for authentication
    pub auth_token: Option<String>,
}

/// Response envelope used by every inventory endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// HTTP inventory client
pub struct HttpInventoryClient {
    config: InventoryClientConfig,
    client: Client,
}

impl HttpInventoryClient {
    /// Create a new inventory client
    pub fn new(config: InventoryClientConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().build()?;
        info!("Created inventory client for {}", config.base_url);
        Ok(Self { config, client })
    }

    /// POST a JSON body and unwrap the response envelope
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("Inventory request: {}", url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let envelope: ApiResponse<T> = request.send().await?.json().await?;
        if envelope.code != 0 {
            return Err(UpstreamError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }

        envelope
            .data
            .ok_or_else(|| UpstreamError::InvalidResponse(format!("{}: empty data", path)))
    }
}

#[async_trait]
impl InventorySource for HttpInventoryClient {
    async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, UpstreamError> {
        self.post("/api/v1/business_units/list", json!({})).await
    }

    async fn list_hosts_with_topo(
        &self,
        unit_id: i64,
        fields: &[&str],
        start: usize,
        limit: usize,
    ) -> Result<HostPage, UpstreamError> {
        self.post(
            "/api/v1/hosts/list_with_topology",
            json!({
                "unit_id": unit_id,
                "fields": fields,
                "page": {"start": start, "limit": limit},
            }),
        )
        .await
    }

    async fn list_cloud_regions(&self) -> Result<Vec<CloudRegion>, UpstreamError> {
        self.post(
            "/api/v1/cloud_regions/list",
            json!({"page": {"start": 0, "limit": 1000}}),
        )
        .await
    }

    async fn topology_tree(&self, unit_id: i64) -> Result<TopoTreeNode, UpstreamError> {
        self.post("/api/v1/topology/tree", json!({"unit_id": unit_id}))
            .await
    }

    async fn internal_containers(
        &self,
        unit_id: i64,
    ) -> Result<InternalContainers, UpstreamError> {
        self.post("/api/v1/topology/internal", json!({"unit_id": unit_id}))
            .await
    }
}
