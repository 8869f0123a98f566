//! Plugin-based store registry
//!
//! The registry maps store type names to factories so the daemon can build a
//! [`DeviceStore`] from configuration without hard-coding every backend.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use devreg_core::config::StoreConfig;
//! use devreg_core::registry::StoreRegistry;
//!
//! # async fn build() -> devreg_core::Result<()> {
//! let registry = StoreRegistry::with_builtin_stores();
//! let store = registry.create_store(&StoreConfig::Memory).await?;
//! # let _ = store;
//! # Ok(())
//! # }
//! ```
//!
//! ## Registration
//!
//! Out-of-tree backends register a factory under the name their
//! `StoreConfig::Custom { factory, .. }` refers to:
//!
//! ```rust,ignore
//! registry.register_store("dynamo", Box::new(DynamoStoreFactory::new(client)));
//! ```

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::{FileDeviceStoreFactory, MemoryDeviceStoreFactory};
use crate::traits::{DeviceStore, DeviceStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Store registry for plugin-based device store creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<dyn DeviceStoreFactory>>>,
}

impl StoreRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryDeviceStoreFactory));
        registry.register_store("file", Box::new(FileDeviceStoreFactory));
        registry
    }

    /// Register a device store factory
    ///
    /// Registering a name twice replaces the earlier factory.
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn DeviceStoreFactory>) {
        let name = name.into();
        debug!(store_type = %name, "registering store factory");
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name, Arc::from(factory));
    }

    /// Create a device store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn DeviceStore>)`: Created store instance
    /// - `Err(Error)`: If the configuration is invalid, the store type is not
    ///   registered, or creation fails
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Arc<dyn DeviceStore>> {
        config.validate()?;
        let store_type = config.type_name();

        let factory = {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown store type: {store_type}")))?
        };

        let config_json = match config {
            StoreConfig::Custom { config, .. } => config.clone(),
            other => serde_json::to_value(other)
                .map_err(|e| Error::config(format!("Failed to serialize store config: {e}")))?,
        };

        factory.create(&config_json).await
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.contains_key(name)
    }
}
