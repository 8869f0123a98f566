// # Memory Device Store
//
// In-memory implementation of DeviceStore.
//
// ## Purpose
//
// Provides a fast store that doesn't persist across restarts. Used as the
// substitutable double for the mutation engine and listener in tests, and for
// deployments where the table is rebuilt on start.
//
// ## Concurrency
//
// Merges hold the write lock from the read of the current record until the
// merged record is stored, so two writers of the same id serialize.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Layer, Result};
use crate::model::{Device, DeviceChanges};
use crate::traits::device_store::{DeviceStore, DeviceStoreFactory};

/// In-memory device store implementation
///
/// This implementation stores all records in a HashMap protected by a RwLock.
/// Clones share the same table.
///
/// # Example
///
/// ```rust,no_run
/// use devreg_core::store::MemoryDeviceStore;
/// use devreg_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryDeviceStore::new();
///     assert!(store.scan().await.is_err()); // empty table reports NotFound
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    inner: Arc<RwLock<HashMap<String, Device>>>,
}

impl MemoryDeviceStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all records from the store
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

fn missing(id: &str, operation: &'static str) -> Error {
    Error::not_found(format!("device {id}"))
        .tagged(Layer::Store, operation)
        .with_context("device_id", id)
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, id: &str) -> Result<Device> {
        let guard = self.inner.read().await;
        guard.get(id).cloned().ok_or_else(|| missing(id, "get"))
    }

    async fn scan(&self) -> Result<Vec<Device>> {
        let guard = self.inner.read().await;
        if guard.is_empty() {
            return Err(Error::not_found("no devices found").tagged(Layer::Store, "scan"));
        }
        let mut devices: Vec<Device> = guard.values().cloned().collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        debug!(count = devices.len(), "scanned devices");
        Ok(devices)
    }

    async fn put(&self, device: Device) -> Result<Device> {
        let mut guard = self.inner.write().await;
        guard.insert(device.id.clone(), device.clone());
        debug!(device_id = %device.id, "stored device");
        Ok(device)
    }

    async fn merge_update(&self, id: &str, changes: &DeviceChanges) -> Result<Device> {
        let mut guard = self.inner.write().await;
        let current = guard.get_mut(id).ok_or_else(|| missing(id, "merge_update"))?;

        if !current.apply(changes) {
            debug!(device_id = %id, "no mutable fields in update, skipping write");
            return Ok(current.clone());
        }
        current.touch();
        Ok(current.clone())
    }

    async fn patch_home_id(&self, id: &str, home_id: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        let current = guard.get_mut(id).ok_or_else(|| missing(id, "patch_home_id"))?;
        current.home_id = home_id.to_string();
        current.touch();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| missing(id, "delete"))
    }
}

/// Factory for the `memory` store type
#[derive(Debug, Default)]
pub struct MemoryDeviceStoreFactory;

#[async_trait]
impl DeviceStoreFactory for MemoryDeviceStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn DeviceStore>> {
        Ok(Arc::new(MemoryDeviceStore::new()))
    }
}
