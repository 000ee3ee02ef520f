// # Memory Desired-State Store
//
// In-memory implementation of DesiredStateStore.
//
// ## Purpose
//
// Serves interface records, static routes and global settings from ordered
// maps. It can be seeded from a JSON document at startup; changes made at
// runtime (scan results, autoconfiguration) are never written back.
//
// ## Seed Format
//
// ```json
// {
//   "interfaces": [{"id": "em0", "enabled": true, "dhcp": true}],
//   "routes": [{"network": "172.16.0.0", "netmask": 16, "gateway": "10.0.0.1"}],
//   "settings": {"gateway": {"ipv4": "10.0.0.1"}, "dns": {"addresses": ["10.0.0.1"]}}
// }
// ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::model::{InterfaceConfig, InterfaceFilter, NetworkSettings, RouteConfig};
use crate::traits::DesiredStateStore;
use crate::{Error, Result};

/// On-disk seed document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub settings: NetworkSettings,
}

#[derive(Debug, Default)]
struct StoreData {
    interfaces: BTreeMap<String, InterfaceConfig>,
    routes: Vec<RouteConfig>,
    settings: NetworkSettings,
}

/// In-memory desired-state store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreData>>,
}

impl MemoryStore {
    /// Create an empty store with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the records of `seed`
    pub fn from_seed(seed: StoreSeed) -> Self {
        let interfaces = seed
            .interfaces
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        Self {
            inner: Arc::new(RwLock::new(StoreData {
                interfaces,
                routes: seed.routes,
                settings: seed.settings,
            })),
        }
    }

    /// Load a seed document
    ///
    /// A missing or malformed file is an error: the daemon cannot run without
    /// its desired state.
    pub async fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read state file {}: {}", path.display(), e))
        })?;

        let seed: StoreSeed = serde_json::from_str(&content).map_err(|e| {
            Error::store(format!("Failed to parse state file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            "Loaded desired state from {}: {} interfaces, {} routes",
            path.display(),
            seed.interfaces.len(),
            seed.routes.len()
        );

        Ok(Self::from_seed(seed))
    }

    /// Add a static route record
    pub async fn insert_route(&self, route: RouteConfig) {
        self.inner.write().await.routes.push(route);
    }

    /// Replace every static route record
    pub async fn set_routes(&self, routes: Vec<RouteConfig>) {
        self.inner.write().await.routes = routes;
    }
}

#[async_trait]
impl DesiredStateStore for MemoryStore {
    async fn get_interface(&self, id: &str) -> Result<Option<InterfaceConfig>> {
        let guard = self.inner.read().await;
        Ok(guard.interfaces.get(id).cloned())
    }

    async fn query_interfaces(&self, filter: &InterfaceFilter) -> Result<Vec<InterfaceConfig>> {
        let guard = self.inner.read().await;
        Ok(guard
            .interfaces
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn exists(&self, filter: &InterfaceFilter) -> Result<bool> {
        let guard = self.inner.read().await;
        Ok(guard.interfaces.values().any(|record| filter.matches(record)))
    }

    async fn insert_interface(&self, record: InterfaceConfig) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.interfaces.contains_key(&record.id) {
            return Err(Error::store(format!(
                "Interface record {} already exists",
                record.id
            )));
        }
        guard.interfaces.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_interface(&self, record: InterfaceConfig) -> Result<()> {
        let mut guard = self.inner.write().await;
        match guard.interfaces.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(Error::not_found(format!(
                "Interface record {} not found",
                record.id
            ))),
        }
    }

    async fn delete_interface(&self, id: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.interfaces.remove(id);
        Ok(())
    }

    async fn query_routes(&self) -> Result<Vec<RouteConfig>> {
        let guard = self.inner.read().await;
        Ok(guard.routes.clone())
    }

    async fn settings(&self) -> Result<NetworkSettings> {
        let guard = self.inner.read().await;
        Ok(guard.settings.clone())
    }

    async fn update_settings(&self, settings: NetworkSettings) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.settings = settings;
        Ok(())
    }
}
