//! Host and topology cache manager
//!
//! The manager orchestrates full per-unit refreshes, global index
//! publication, stale-entry reconciliation, and event-driven
//! incremental updates. Unit refreshes are bounded by a semaphore so
//! the upstream source never sees more than the configured number of
//! concurrent full scans; the three publication sub-tasks of one
//! refresh run concurrently and are joined before the call returns.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cmdb_inventory::{HOST_FIELDS, HostPage, InventorySource, TopoTreeNode, UpstreamError};
use cmdb_store::HashStore;

use crate::config::EngineConfig;
use crate::error::CacheError;
use crate::events::{EventRecord, HostEvent, RelationEvent, ResourceKind, TopologyEvent};
use crate::index;
use crate::record::{HostRecord, module_key};
use crate::topology::{self, attach_internal_containers, module_topo_links};

/// Host index key name (composite and numeric key spaces)
pub const HOST_KEY: &str = "host";
/// Agent index key name
pub const AGENT_ID_KEY: &str = "agent_id";
/// Ip-ownership index key name
pub const HOST_IP_KEY: &str = "host_ip";
/// Topo index key name
pub const TOPO_KEY: &str = "topo";

/// Every published key name
pub const CACHE_KEYS: [&str; 4] = [HOST_KEY, TOPO_KEY, AGENT_ID_KEY, HOST_IP_KEY];

/// Remaining host pages fetched in flight at once
const PAGE_FETCH_CONCURRENCY: usize = 4;

/// One unit's most recent consistent snapshot
struct UnitSnapshot {
    hosts: Vec<HostRecord>,
    topo: TopoTreeNode,
}

/// Host and topology cache manager
pub struct HostTopoCacheManager {
    config: EngineConfig,
    inventory: Arc<dyn InventorySource>,
    store: Arc<dyn HashStore>,
    refresh_permits: Semaphore,
    snapshots: RwLock<HashMap<i64, UnitSnapshot>>,
    /// ip → composite keys of every host currently claiming it
    host_ip_map: RwLock<HashMap<String, BTreeSet<String>>>,
    /// Fields written per key name; reconciliation deletes everything else
    published: Mutex<HashMap<&'static str, HashSet<String>>>,
}

impl HostTopoCacheManager {
    /// Create a new cache manager
    pub fn new(
        config: EngineConfig,
        inventory: Arc<dyn InventorySource>,
        store: Arc<dyn HashStore>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        info!(
            "Initializing host/topo cache manager (prefix: {}, concurrency: {})",
            config.key_prefix, config.concurrent_limit
        );

        let mut published = HashMap::new();
        for name in CACHE_KEYS {
            published.insert(name, HashSet::new());
        }

        Ok(Self {
            refresh_permits: Semaphore::new(config.concurrent_limit),
            config,
            inventory,
            store,
            snapshots: RwLock::new(HashMap::new()),
            host_ip_map: RwLock::new(HashMap::new()),
            published: Mutex::new(published),
        })
    }

    /// Full store key for a key name
    pub fn cache_key(&self, name: &str) -> String {
        format!("{}.{}", self.config.key_prefix, name)
    }

    /// Units currently held in the in-memory snapshot
    pub async fn cached_units(&self) -> Vec<i64> {
        self.snapshots.read().await.keys().copied().collect()
    }

    /// Race a call against cancellation and its deadline
    async fn guarded<T, E>(
        &self,
        cancel: &CancellationToken,
        limit: Duration,
        what: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, CacheError>
    where
        CacheError: From<E>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(result) => result.map_err(CacheError::from),
                Err(_) => Err(CacheError::DeadlineExceeded(what)),
            },
        }
    }

    /// Merge-write fields into a published hash and record them in the
    /// published-field ledger
    async fn update_hash(
        &self,
        cancel: &CancellationToken,
        name: &'static str,
        fields: HashMap<String, String>,
    ) -> Result<(), CacheError> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = self.cache_key(name);
        let written: Vec<String> = fields.keys().cloned().collect();
        self.guarded(
            cancel,
            self.config.store_timeout,
            "store write",
            self.store.put_fields(&key, fields),
        )
        .await?;

        let mut published = self.published.lock();
        if let Some(set) = published.get_mut(name) {
            set.extend(written);
        }
        Ok(())
    }

    async fn publish_artifact(
        &self,
        cancel: &CancellationToken,
        name: &'static str,
        fields: Result<HashMap<String, String>, serde_json::Error>,
    ) -> Result<(), CacheError> {
        let fields = fields?;
        self.update_hash(cancel, name, fields).await
    }

    /// Drop a superseded snapshot's fields from the published ledger so
    /// reconciliation reflects the current in-memory view
    fn forget_unit_fields(&self, snapshot: &UnitSnapshot) {
        let mut host_fields = Vec::new();
        let mut agent_fields = Vec::new();
        for host in &snapshot.hosts {
            if let Some(key) = host.composite_key() {
                host_fields.push(key);
            }
            if let Some(key) = host.numeric_key() {
                host_fields.push(key);
            }
            if !host.agent_id.is_empty() {
                agent_fields.push(host.agent_id.clone());
            }
        }
        let mut topo_fields = Vec::new();
        topology::traverse(&snapshot.topo, &mut |node| topo_fields.push(node.node_key()));

        let mut published = self.published.lock();
        for (name, fields) in [
            (HOST_KEY, host_fields),
            (AGENT_ID_KEY, agent_fields),
            (TOPO_KEY, topo_fields),
        ] {
            if let Some(set) = published.get_mut(name) {
                for field in fields {
                    set.remove(&field);
                }
            }
        }
    }

    async fn fetch_host_page(
        &self,
        cancel: &CancellationToken,
        unit_id: i64,
        start: usize,
    ) -> Result<HostPage, CacheError> {
        self.guarded(
            cancel,
            self.config.fetch_timeout,
            "host page fetch",
            self.inventory
                .list_hosts_with_topo(unit_id, HOST_FIELDS, start, self.config.page_size),
        )
        .await
    }

    /// Fetch one unit's full inventory and build its snapshot
    async fn fetch_unit(
        &self,
        cancel: &CancellationToken,
        unit_id: i64,
    ) -> Result<(Vec<HostRecord>, TopoTreeNode), CacheError> {
        let limit = self.config.page_size;
        let first = self.fetch_host_page(cancel, unit_id, 0).await?;
        let total = first.count;
        let mut raw_hosts = first.hosts;

        if total > raw_hosts.len() {
            let offsets: Vec<usize> = (limit..total).step_by(limit).collect();
            let mut pages = stream::iter(offsets)
                .map(|start| self.fetch_host_page(cancel, unit_id, start))
                .buffered(PAGE_FETCH_CONCURRENCY);
            while let Some(page) = pages.next().await {
                raw_hosts.extend(page?.hosts);
            }
        }
        if raw_hosts.len() != total {
            return Err(CacheError::Fetch(UpstreamError::InvalidResponse(format!(
                "unit {}: host listing returned {} of {} records",
                unit_id,
                raw_hosts.len(),
                total
            ))));
        }

        let regions = self
            .guarded(
                cancel,
                self.config.fetch_timeout,
                "cloud region fetch",
                self.inventory.list_cloud_regions(),
            )
            .await?;
        let region_names: HashMap<i64, String> =
            regions.into_iter().map(|r| (r.id, r.name)).collect();

        let mut topo = self
            .guarded(
                cancel,
                self.config.fetch_timeout,
                "topology fetch",
                self.inventory.topology_tree(unit_id),
            )
            .await?;
        let containers = self
            .guarded(
                cancel,
                self.config.fetch_timeout,
                "internal container fetch",
                self.inventory.internal_containers(unit_id),
            )
            .await?;
        attach_internal_containers(&mut topo, &containers);

        let links = module_topo_links(&topo);

        let mut hosts: Vec<HostRecord> = raw_hosts.iter().map(HostRecord::from_raw).collect();
        for host in &mut hosts {
            host.unit_id = unit_id;
            host.cloud_region_name = region_names
                .get(&host.cloud_region_id)
                .cloned()
                .unwrap_or_else(|| host.cloud_region_id.to_string());
            // hosts may reference modules the tree no longer carries
            for module_id in &host.module_ids {
                if let Some(link) = links.get(module_id) {
                    host.topo_links.insert(module_key(*module_id), link.clone());
                }
            }
        }

        Ok((hosts, topo))
    }

    /// Refresh the cache for one business unit
    ///
    /// The fetch is the only fatal path. Once the snapshot is
    /// installed, the topo, host, and agent indices are published
    /// concurrently; a failed publication is logged and does not abort
    /// its siblings or fail the refresh.
    pub async fn refresh_by_unit(
        &self,
        cancel: &CancellationToken,
        unit_id: i64,
    ) -> Result<(), CacheError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            permit = self.refresh_permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(CacheError::Cancelled),
            },
        };

        info!("Starting cache refresh for unit {}", unit_id);
        let started = Instant::now();

        let (hosts, topo) = self.fetch_unit(cancel, unit_id).await?;

        {
            let mut ip_map = self.host_ip_map.write().await;
            for (ip, key) in index::ip_memberships(&hosts) {
                ip_map.entry(ip).or_default().insert(key);
            }
        }

        let host_fields = index::host_entries(&hosts);
        let agent_fields = Ok(index::agent_entries(&hosts));
        let topo_fields = index::topo_entries(&topo);

        {
            let mut snapshots = self.snapshots.write().await;
            if let Some(previous) = snapshots.get(&unit_id) {
                self.forget_unit_fields(previous);
            }
            snapshots.insert(unit_id, UnitSnapshot { hosts, topo });
        }

        let (topo_result, host_result, agent_result) = tokio::join!(
            self.publish_artifact(cancel, TOPO_KEY, topo_fields),
            self.publish_artifact(cancel, HOST_KEY, host_fields),
            self.publish_artifact(cancel, AGENT_ID_KEY, agent_fields),
        );
        for (name, result) in [
            (TOPO_KEY, topo_result),
            (HOST_KEY, host_result),
            (AGENT_ID_KEY, agent_result),
        ] {
            if let Err(e) = result {
                error!("Failed to publish {} index for unit {}: {}", name, unit_id, e);
            }
        }

        info!(
            "Finished cache refresh for unit {}, cost: {:?}",
            unit_id,
            started.elapsed()
        );
        Ok(())
    }

    /// Publish the accumulated ip-ownership index and refresh the
    /// expiration of every published key
    ///
    /// Safe to call repeatedly: rewriting the same accumulated state is
    /// an idempotent overwrite.
    pub async fn publish_global_index(&self, cancel: &CancellationToken) -> Result<(), CacheError> {
        let snapshot: Vec<(String, Vec<String>)> = {
            let ip_map = self.host_ip_map.read().await;
            ip_map
                .iter()
                .map(|(ip, keys)| (ip.clone(), keys.iter().cloned().collect()))
                .collect()
        };

        let mut fields = HashMap::with_capacity(snapshot.len());
        for (ip, keys) in snapshot {
            fields.insert(ip, serde_json::to_string(&keys)?);
        }
        self.update_hash(cancel, HOST_IP_KEY, fields).await?;

        for name in CACHE_KEYS {
            let key = self.cache_key(name);
            if let Err(e) = self
                .guarded(
                    cancel,
                    self.config.store_timeout,
                    "store expire",
                    self.store.expire(&key, self.config.expire),
                )
                .await
            {
                warn!("Failed to refresh expiration, key: {}, err: {}", key, e);
            }
        }
        Ok(())
    }

    /// Delete every stored field absent from the current in-memory view
    ///
    /// This is what removes hosts and units deleted upstream between
    /// full scans; incremental events alone cannot guarantee deletion
    /// visibility.
    pub async fn reconcile_deleted(&self, cancel: &CancellationToken) -> Result<(), CacheError> {
        for name in CACHE_KEYS {
            let key = self.cache_key(name);
            let stored = self
                .guarded(
                    cancel,
                    self.config.store_timeout,
                    "store scan",
                    self.store.field_names(&key),
                )
                .await?;

            let stale: Vec<String> = {
                let published = self.published.lock();
                let live = published.get(name);
                stored
                    .into_iter()
                    .filter(|field| live.is_none_or(|set| !set.contains(field)))
                    .collect()
            };
            if stale.is_empty() {
                continue;
            }

            debug!("Reconciling {} stale fields from {}", stale.len(), key);
            self.guarded(
                cancel,
                self.config.store_timeout,
                "store delete",
                self.store.delete_fields(&key, &stale),
            )
            .await?;
        }
        Ok(())
    }

    /// Apply a batch of incremental change events
    pub async fn handle_change_events(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
        events: &[EventRecord],
    ) -> Result<(), CacheError> {
        if events.is_empty() {
            return Ok(());
        }
        debug!("Handling {} {} change events", events.len(), kind.as_str());

        match kind {
            ResourceKind::Host => self.handle_host_events(cancel, events).await,
            ResourceKind::Topology => self.handle_topology_events(cancel, events).await,
            ResourceKind::HostRelation => {
                let units: Vec<i64> = events
                    .iter()
                    .filter_map(RelationEvent::parse)
                    .map(|event| event.unit_id)
                    .collect();
                self.refresh_units(cancel, &units).await;
                Ok(())
            }
        }
    }

    /// Host events: point-delete the identified index entries, then
    /// fully refresh the owning units discovered from the cache
    async fn handle_host_events(
        &self,
        cancel: &CancellationToken,
        events: &[EventRecord],
    ) -> Result<(), CacheError> {
        let mut agent_ids = Vec::new();
        let mut host_keys = Vec::new();
        for event in events {
            let Some(parsed) = HostEvent::parse(event) else {
                continue;
            };
            if let Some(agent_id) = &parsed.agent_id {
                agent_ids.push(agent_id.clone());
            }
            host_keys.extend(parsed.host_keys());
        }
        if agent_ids.is_empty() && host_keys.is_empty() {
            return Ok(());
        }

        // resolve owning units before the point deletes drop the records
        let mut touched_units = Vec::new();
        if !host_keys.is_empty() {
            let key = self.cache_key(HOST_KEY);
            let values = self
                .guarded(
                    cancel,
                    self.config.store_timeout,
                    "store read",
                    self.store.get_fields(&key, &host_keys),
                )
                .await?;
            for value in values.into_iter().flatten() {
                match serde_json::from_str::<HostRecord>(&value) {
                    Ok(record) => touched_units.push(record.unit_id),
                    Err(e) => debug!("Skipping malformed cached host record: {}", e),
                }
            }
        }

        if !agent_ids.is_empty() {
            let key = self.cache_key(AGENT_ID_KEY);
            if let Err(e) = self
                .guarded(
                    cancel,
                    self.config.store_timeout,
                    "store delete",
                    self.store.delete_fields(&key, &agent_ids),
                )
                .await
            {
                error!("Failed to delete fields, key: {}, err: {}", key, e);
            }
        }
        if !host_keys.is_empty() {
            let key = self.cache_key(HOST_KEY);
            if let Err(e) = self
                .guarded(
                    cancel,
                    self.config.store_timeout,
                    "store delete",
                    self.store.delete_fields(&key, &host_keys),
                )
                .await
            {
                error!("Failed to delete fields, key: {}, err: {}", key, e);
            }
        }

        self.refresh_units(cancel, &touched_units).await;
        Ok(())
    }

    /// Topology events: upsert the affected topo-index entries
    async fn handle_topology_events(
        &self,
        cancel: &CancellationToken,
        events: &[EventRecord],
    ) -> Result<(), CacheError> {
        let mut fields = HashMap::new();
        for event in events {
            let Some(parsed) = TopologyEvent::parse(event) else {
                continue;
            };
            fields.insert(parsed.node_key(), serde_json::to_string(&parsed.summary())?);
        }
        self.update_hash(cancel, TOPO_KEY, fields).await
    }

    /// Refresh a set of units, deduplicated, bounded by the refresh
    /// semaphore; individual failures are logged and do not fail the
    /// batch
    pub async fn refresh_units(&self, cancel: &CancellationToken, units: &[i64]) {
        let unique: BTreeSet<i64> = units.iter().copied().collect();
        if unique.is_empty() {
            return;
        }
        info!("Refreshing units: {:?}", unique);

        let refreshes = unique.into_iter().map(|unit_id| async move {
            if let Err(e) = self.refresh_by_unit(cancel, unit_id).await {
                error!("Failed to refresh unit {}: {}", unit_id, e);
            }
        });
        future::join_all(refreshes).await;
    }

    /// Clear all in-memory state; the published store is untouched
    pub async fn reset(&self) {
        self.snapshots.write().await.clear();
        self.host_ip_map.write().await.clear();
        let mut published = self.published.lock();
        for name in CACHE_KEYS {
            published.insert(name, HashSet::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmdb_inventory::{
        BusinessUnit, CloudRegion, HostWithTopo, InternalContainers, ModuleRef, RawHost, TopoPath,
    };
    use cmdb_store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockInventory {
        hosts: parking_lot::RwLock<HashMap<i64, Vec<HostWithTopo>>>,
        trees: parking_lot::RwLock<HashMap<i64, TopoTreeNode>>,
        regions: Vec<CloudRegion>,
        host_fetches: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fetch_delay: Duration,
    }

    impl MockInventory {
        fn new() -> Self {
            Self {
                hosts: parking_lot::RwLock::new(HashMap::new()),
                trees: parking_lot::RwLock::new(HashMap::new()),
                regions: vec![
                    CloudRegion {
                        id: 0,
                        name: "default area".to_string(),
                    },
                    CloudRegion {
                        id: 1,
                        name: "cloud one".to_string(),
                    },
                ],
                host_fetches: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fetch_delay: Duration::ZERO,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                fetch_delay: delay,
                ..Self::new()
            }
        }

        fn set_hosts(&self, unit_id: i64, hosts: Vec<HostWithTopo>) {
            self.hosts.write().insert(unit_id, hosts);
        }

        fn default_tree(unit_id: i64) -> TopoTreeNode {
            TopoTreeNode {
                obj_id: "biz".to_string(),
                obj_name: "Business".to_string(),
                inst_id: unit_id,
                inst_name: format!("unit-{}", unit_id),
                children: vec![TopoTreeNode {
                    obj_id: "set".to_string(),
                    obj_name: "Set".to_string(),
                    inst_id: 10,
                    inst_name: "gateway".to_string(),
                    children: vec![TopoTreeNode {
                        obj_id: "module".to_string(),
                        obj_name: "Module".to_string(),
                        inst_id: 100,
                        inst_name: "api".to_string(),
                        children: vec![],
                    }],
                }],
            }
        }
    }

    #[async_trait]
    impl InventorySource for MockInventory {
        async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, UpstreamError> {
            Ok(self
                .hosts
                .read()
                .keys()
                .map(|id| BusinessUnit {
                    id: *id,
                    name: format!("unit-{}", id),
                })
                .collect())
        }

        async fn list_hosts_with_topo(
            &self,
            unit_id: i64,
            _fields: &[&str],
            start: usize,
            limit: usize,
        ) -> Result<HostPage, UpstreamError> {
            self.host_fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let all = self.hosts.read().get(&unit_id).cloned().unwrap_or_default();
            Ok(HostPage {
                count: all.len(),
                hosts: all.into_iter().skip(start).take(limit).collect(),
            })
        }

        async fn list_cloud_regions(&self) -> Result<Vec<CloudRegion>, UpstreamError> {
            Ok(self.regions.clone())
        }

        async fn topology_tree(&self, unit_id: i64) -> Result<TopoTreeNode, UpstreamError> {
            Ok(self
                .trees
                .read()
                .get(&unit_id)
                .cloned()
                .unwrap_or_else(|| Self::default_tree(unit_id)))
        }

        async fn internal_containers(
            &self,
            unit_id: i64,
        ) -> Result<InternalContainers, UpstreamError> {
            Ok(InternalContainers {
                set_id: 9000 + unit_id,
                set_name: "idle pool".to_string(),
                modules: vec![ModuleRef {
                    module_id: 9100 + unit_id,
                    module_name: "idle hosts".to_string(),
                }],
            })
        }
    }

    fn host(host_id: i64, ip: &str, cloud: i64, agent: &str) -> HostWithTopo {
        HostWithTopo {
            host: RawHost {
                host_id,
                inner_ip: ip.to_string(),
                cloud_region_id: cloud,
                agent_id: agent.to_string(),
                host_name: format!("host-{}", host_id),
                ..RawHost::default()
            },
            topo: vec![TopoPath {
                set_id: 10,
                set_name: "gateway".to_string(),
                modules: vec![ModuleRef {
                    module_id: 100,
                    module_name: "api".to_string(),
                }],
            }],
        }
    }

    fn manager(
        inventory: Arc<MockInventory>,
        store: Arc<MemoryStore>,
        limit: usize,
    ) -> HostTopoCacheManager {
        let config = EngineConfig {
            concurrent_limit: limit,
            ..EngineConfig::default()
        };
        HostTopoCacheManager::new(config, inventory, store).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_publishes_all_indices() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![
            host(7, "10.0.0.7", 0, "agent-7"),
            host(8, "", 0, ""),
        ]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory, store.clone(), 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();

        let hosts = store.dump("cmdb.host");
        assert_eq!(hosts.len(), 3); // composite + numeric for 7, numeric only for 8
        assert_eq!(hosts["10.0.0.7|0"], hosts["7"]);

        let record: HostRecord = serde_json::from_str(&hosts["7"]).unwrap();
        assert_eq!(record.unit_id, 1);
        assert_eq!(record.cloud_region_name, "default area");
        let link = &record.topo_links["module|100"];
        assert_eq!(link.iter().map(|n| n.inst_id).collect::<Vec<_>>(), [
            1, 10, 100
        ]);

        let topo = store.dump("cmdb.topo");
        assert!(topo.contains_key("biz|1"));
        assert!(topo.contains_key("set|10"));
        assert!(topo.contains_key("module|100"));
        // synthetic built-in containers are indexed like real nodes
        assert!(topo.contains_key("set|9001"));
        assert!(topo.contains_key("module|9101"));

        let agents = store.dump("cmdb.agent_id");
        assert_eq!(agents.len(), 1);
        assert_eq!(agents["agent-7"], "7");
    }

    #[tokio::test]
    async fn test_publish_global_index_is_idempotent() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![host(1, "10.0.0.1", 0, "")]);
        inventory.set_hosts(2, vec![host(2, "10.0.0.1", 1, "")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory, store.clone(), 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();
        m.refresh_by_unit(&cancel, 2).await.unwrap();

        m.publish_global_index(&cancel).await.unwrap();
        let first = store.dump("cmdb.host_ip");
        // one ip claimed under two cloud regions keeps both composite keys
        assert_eq!(first["10.0.0.1"], r#"["10.0.0.1|0","10.0.0.1|1"]"#);

        m.publish_global_index(&cancel).await.unwrap();
        assert_eq!(store.dump("cmdb.host_ip"), first);
    }

    #[tokio::test]
    async fn test_reconcile_converges_deletions_without_cross_unit_damage() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![
            host(1, "10.0.0.1", 0, "agent-1"),
            host(2, "10.0.0.2", 0, "agent-2"),
        ]);
        inventory.set_hosts(2, vec![host(3, "10.0.1.1", 0, "agent-3")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store.clone(), 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();
        m.refresh_by_unit(&cancel, 2).await.unwrap();

        // host 2 disappears upstream; re-refresh its unit and reconcile
        inventory.set_hosts(1, vec![host(1, "10.0.0.1", 0, "agent-1")]);
        m.refresh_by_unit(&cancel, 1).await.unwrap();
        m.reconcile_deleted(&cancel).await.unwrap();

        let hosts = store.dump("cmdb.host");
        assert!(!hosts.contains_key("2"));
        assert!(!hosts.contains_key("10.0.0.2|0"));
        assert!(hosts.contains_key("1"));
        // the unit that was not touched keeps its entries
        assert!(hosts.contains_key("3"));
        assert!(hosts.contains_key("10.0.1.1|0"));

        let agents = store.dump("cmdb.agent_id");
        assert!(!agents.contains_key("agent-2"));
        assert!(agents.contains_key("agent-1"));
        assert!(agents.contains_key("agent-3"));
    }

    #[tokio::test]
    async fn test_relation_events_trigger_one_refresh_per_unit() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(5, vec![host(1, "10.0.0.1", 0, "")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store, 2);
        let cancel = CancellationToken::new();

        let events: Vec<EventRecord> = (0..50)
            .map(|_| json!({"unit_id": 5}).as_object().cloned().unwrap())
            .collect();
        m.handle_change_events(&cancel, ResourceKind::HostRelation, &events)
            .await
            .unwrap();

        assert_eq!(inventory.host_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_concurrency_is_bounded() {
        let inventory = Arc::new(MockInventory::with_delay(Duration::from_millis(25)));
        for unit_id in 1..=5 {
            inventory.set_hosts(unit_id, vec![host(unit_id, "10.0.0.1", 0, "")]);
        }
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store, 2);
        let cancel = CancellationToken::new();

        m.refresh_units(&cancel, &[1, 2, 3, 4, 5]).await;

        assert_eq!(inventory.host_fetches.load(Ordering::SeqCst), 5);
        assert!(inventory.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_host_events_point_delete_and_refresh_owner() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![host(7, "10.0.0.7", 0, "agent-7")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store.clone(), 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();

        // the host is gone upstream; its delete event names every identifier
        inventory.set_hosts(1, vec![]);
        let events = vec![
            json!({
                "host_id": 7,
                "inner_ip": "10.0.0.7",
                "cloud_region_id": 0,
                "agent_id": "agent-7",
            })
            .as_object()
            .cloned()
            .unwrap(),
        ];
        m.handle_change_events(&cancel, ResourceKind::Host, &events)
            .await
            .unwrap();

        let hosts = store.dump("cmdb.host");
        assert!(!hosts.contains_key("7"));
        assert!(!hosts.contains_key("10.0.0.7|0"));
        assert!(!store.dump("cmdb.agent_id").contains_key("agent-7"));
        // owning unit got a full refresh: initial page + fallback page
        assert_eq!(inventory.host_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_host_events_without_cached_record_skip_refresh() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![host(7, "10.0.0.7", 0, "")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store, 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();

        let events = vec![json!({"host_id": 99}).as_object().cloned().unwrap()];
        m.handle_change_events(&cancel, ResourceKind::Host, &events)
            .await
            .unwrap();

        // no cached record, no owning unit, no fallback refresh
        assert_eq!(inventory.host_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_topology_events_upsert_nodes() {
        let inventory = Arc::new(MockInventory::new());
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory, store.clone(), 2);
        let cancel = CancellationToken::new();

        let events = vec![
            json!({
                "obj_id": "set",
                "inst_id": 7,
                "inst_name": "gateway",
                "obj_name": "Set",
            })
            .as_object()
            .cloned()
            .unwrap(),
            // missing the instance id: skipped
            json!({"obj_id": "set"}).as_object().cloned().unwrap(),
        ];
        m.handle_change_events(&cancel, ResourceKind::Topology, &events)
            .await
            .unwrap();

        let topo = store.dump("cmdb.topo");
        assert_eq!(topo.len(), 1);
        let summary: crate::topology::TopoNodeSummary =
            serde_json::from_str(&topo["set|7"]).unwrap();
        assert_eq!(summary.inst_id, 7);
        assert_eq!(summary.inst_name, "gateway");
    }

    #[tokio::test]
    async fn test_cancelled_refresh_aborts_before_fetch() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![host(1, "10.0.0.1", 0, "")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory.clone(), store, 2);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = m.refresh_by_unit(&cancel, 1).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
        assert_eq!(inventory.host_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_in_memory_state_only() {
        let inventory = Arc::new(MockInventory::new());
        inventory.set_hosts(1, vec![host(1, "10.0.0.1", 0, "")]);
        let store = Arc::new(MemoryStore::new());
        let m = manager(inventory, store.clone(), 2);
        let cancel = CancellationToken::new();

        m.refresh_by_unit(&cancel, 1).await.unwrap();
        assert_eq!(m.cached_units().await, vec![1]);

        m.reset().await;
        assert!(m.cached_units().await.is_empty());
        // published entries survive a reset until the next reconcile pass
        assert!(store.dump("cmdb.host").contains_key("1"));
    }
}
