// # Device Store Trait
//
// Defines the persistence interface the mutation engine composes.
//
// ## Purpose
//
// One table, one row per device, keyed by `id`. The store owns:
// - Identity assignment for new records
// - Read-modify-write of partial updates as a single critical section
// - Advancing `modifiedAt` from the value it just read
//
// Keeping read-modify-write inside the store is what lets the synchronous
// update path and the queued home-association path run concurrently against
// the same record without moving `modifiedAt` backwards.
//
// ## Implementations
//
// - In-memory: `MemoryDeviceStore` (tests, ephemeral deployments)
// - JSON file: `FileDeviceStore` (single-node persistence)
//
// ## Usage
//
// ```rust,ignore
// use devreg_core::traits::DeviceStore;
// use devreg_core::model::DeviceChanges;
//
// let store = /* DeviceStore implementation */;
// let device = store.get(&id).await?;
// let renamed = store
//     .merge_update(&id, &DeviceChanges { name: Some("Hall".into()), ..Default::default() })
//     .await?;
// assert!(renamed.modified_at > device.modified_at);
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Device, DeviceChanges, NewDevice};

/// Trait for device store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks, including
/// concurrent mutations of the same `id`.
///
/// # Consistency
///
/// - Every read reflects the latest committed write; no caching layer.
/// - For a given `id`, a mutation that commits later never leaves `modifiedAt`
///   earlier than one that committed before it.
/// - Concurrent mutations of one record resolve last-write-wins.
///
/// # Errors
///
/// Implementations tag errors with [`Layer::Store`](crate::error::Layer::Store)
/// and the operation name. Absent records are `NotFound`; undecodable items
/// are `Unmarshal`; I/O or backend failures are `Store`.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Point lookup by identifier
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The stored record
    /// - `Err(NotFound)`: No record under `id`
    async fn get(&self, id: &str) -> Result<Device>;

    /// Read every record
    ///
    /// Items that fail to decode are logged and skipped. When the table holds
    /// at least one item and none decode, the scan fails with `Unmarshal`.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Device>)`: At least one record
    /// - `Err(NotFound)`: The table is empty
    async fn scan(&self) -> Result<Vec<Device>>;

    /// Unconditional upsert
    ///
    /// Only used for records that already carry a freshly assigned `id`.
    async fn put(&self, device: Device) -> Result<Device>;

    /// Merge `changes` onto the stored record and advance `modifiedAt`
    ///
    /// Only present, non-empty fields override. When `changes` holds no such
    /// field the current record is returned and nothing is written.
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The record as it stands after the merge
    /// - `Err(NotFound)`: No record under `id`
    async fn merge_update(&self, id: &str, changes: &DeviceChanges) -> Result<Device>;

    /// Set `homeId` and advance `modifiedAt`, leaving every other field alone
    async fn patch_home_id(&self, id: &str, home_id: &str) -> Result<()>;

    /// Remove a record
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The record existed and was removed
    /// - `Err(NotFound)`: No record under `id`
    async fn delete(&self, id: &str) -> Result<()>;

    /// Assign identity and timestamps, then [`put`](DeviceStore::put)
    async fn create(&self, new_device: NewDevice) -> Result<Device> {
        self.put(Device::register(new_device)).await
    }
}

/// Helper trait for constructing device stores from configuration
#[async_trait]
pub trait DeviceStoreFactory: Send + Sync {
    /// Create a DeviceStore instance from its serialized `StoreConfig`
    async fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn DeviceStore>>;
}
