// # Desired-State Source
//
// The central configuration store holding interface records, static routes
// and the global `network.*` settings. The daemon only consumes it.

use crate::model::{InterfaceConfig, InterfaceFilter, NetworkSettings, RouteConfig};
use crate::Result;
use async_trait::async_trait;

/// Trait for desired-state source implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Get an interface record by id
    ///
    /// # Returns
    ///
    /// - `Ok(Some(InterfaceConfig))`: The record
    /// - `Ok(None)`: No record with that id
    /// - `Err(Error)`: Storage error
    async fn get_interface(&self, id: &str) -> Result<Option<InterfaceConfig>>;

    /// Interface records matching `filter`, ordered by id
    async fn query_interfaces(&self, filter: &InterfaceFilter) -> Result<Vec<InterfaceConfig>>;

    /// Whether any interface record matches `filter`
    async fn exists(&self, filter: &InterfaceFilter) -> Result<bool> {
        Ok(!self.query_interfaces(filter).await?.is_empty())
    }

    /// Insert a new interface record
    ///
    /// Fails with `Error::Store` if a record with the same id exists.
    async fn insert_interface(&self, record: InterfaceConfig) -> Result<()>;

    /// Replace an existing interface record
    ///
    /// Fails with `Error::NotFound` if no record has that id.
    async fn update_interface(&self, record: InterfaceConfig) -> Result<()>;

    /// Delete an interface record (no-op if absent)
    async fn delete_interface(&self, id: &str) -> Result<()>;

    /// All static route records
    async fn query_routes(&self) -> Result<Vec<RouteConfig>>;

    /// Global network settings
    async fn settings(&self) -> Result<NetworkSettings>;

    async fn update_settings(&self, settings: NetworkSettings) -> Result<()>;
}
