//! Device mutation engine
//!
//! The MutationEngine is responsible for:
//! - Validating caller input (every violated rule reported at once)
//! - Translating domain operations into DeviceStore calls
//! - Tagging store failures with the engine layer and operation name
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌───────────────────────┐
//! │ request handlers │        │ AssociationListener   │
//! └──────────────────┘        └───────────────────────┘
//!          │ create/get/list/update/delete  │ update_home_association
//!          └──────────────┐      ┌──────────┘
//!                         ▼      ▼
//!                   ┌──────────────────┐
//!                   │  MutationEngine  │
//!                   └──────────────────┘
//!                            │
//!                            ▼
//!                   ┌──────────────────┐
//!                   │   DeviceStore    │  read-modify-write per record
//!                   └──────────────────┘
//! ```
//!
//! The engine never performs a separate read followed by a write; every
//! mutation is one store primitive so concurrent callers cannot interleave
//! between the read and the write.
//!
//! The engine holds no state beyond the store handle and sets no timeouts.
//! Dropping a returned future cancels the store call it is awaiting.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Layer, Result};
use crate::model::{Device, DeviceAttributes, DevicePatch};
use crate::traits::DeviceStore;
use crate::validation;

/// Validated business-logic layer between callers and the device store
#[derive(Clone)]
pub struct MutationEngine {
    store: Arc<dyn DeviceStore>,
}

impl MutationEngine {
    /// Create an engine over an injected store handle
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Register a new device
    ///
    /// Requires `mac`, `name`, `type` and `homeId`. Identity and timestamps are
    /// assigned by the store.
    pub async fn create(&self, attrs: DeviceAttributes) -> Result<Device> {
        debug!(layer = "engine", operation = "create", mac = ?attrs.mac, "creating device");

        let new_device = validation::validate_new_device(&attrs)
            .map_err(|e| rejected("create", e))?;

        let device = self
            .store
            .create(new_device)
            .await
            .map_err(|e| escalate("create", e))?;

        debug!(device_id = %device.id, "device created");
        Ok(device)
    }

    /// Fetch one device
    pub async fn get(&self, id: &str) -> Result<Device> {
        debug!(layer = "engine", operation = "get", device_id = %id, "fetching device");

        validation::validate_device_id(id).map_err(|e| rejected("get", e))?;
        self.store.get(id).await.map_err(|e| escalate("get", e))
    }

    /// Fetch every device
    ///
    /// An empty table is reported as `NotFound`, not as an empty list.
    pub async fn list(&self) -> Result<Vec<Device>> {
        debug!(layer = "engine", operation = "list", "fetching devices");
        self.store.scan().await.map_err(|e| escalate("list", e))
    }

    /// Apply a partial update
    ///
    /// At least one mutable field must be supplied; fields not supplied keep
    /// their stored values.
    pub async fn update(&self, id: &str, patch: DevicePatch) -> Result<Device> {
        debug!(layer = "engine", operation = "update", device_id = %id, "updating device");

        validation::validate_device_id(id).map_err(|e| rejected("update", e))?;
        let changes = validation::validate_patch(&patch).map_err(|e| rejected("update", e))?;

        self.store
            .merge_update(id, &changes)
            .await
            .map_err(|e| escalate("update", e))
    }

    /// Remove a device
    pub async fn delete(&self, id: &str) -> Result<()> {
        debug!(layer = "engine", operation = "delete", device_id = %id, "deleting device");

        validation::validate_device_id(id).map_err(|e| rejected("delete", e))?;
        self.store.delete(id).await.map_err(|e| escalate("delete", e))
    }

    /// Point a device at a different home
    ///
    /// Only non-emptiness is checked: the home identifier originates in an
    /// external system of record and is applied as delivered.
    pub async fn update_home_association(&self, id: &str, home_id: &str) -> Result<()> {
        debug!(
            layer = "engine",
            operation = "update_home_association",
            device_id = %id,
            home_id = %home_id,
            "updating device home association"
        );

        let mut violations = Vec::new();
        if id.trim().is_empty() {
            violations.push("device ID is required".to_string());
        }
        if home_id.trim().is_empty() {
            violations.push("homeId is required".to_string());
        }
        if !violations.is_empty() {
            return Err(rejected("update_home_association", Error::validation(violations)));
        }

        self.store
            .patch_home_id(id, home_id)
            .await
            .map_err(|e| escalate("update_home_association", e))
    }
}

/// Tag a locally decided validation failure
fn rejected(operation: &'static str, err: Error) -> Error {
    debug!(operation, error = %err, "request rejected");
    err.tagged(Layer::Engine, operation)
}

/// Tag a store failure on its way up
fn escalate(operation: &'static str, err: Error) -> Error {
    warn!(
        layer = "engine",
        operation,
        kind = %err.kind(),
        retryable = err.is_retryable(),
        error = %err,
        "store operation failed"
    );
    err.tagged(Layer::Engine, operation)
}
