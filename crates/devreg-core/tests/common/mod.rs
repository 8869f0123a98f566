//! Test doubles and common utilities for contract tests
//!
//! This module provides a store double with injectable failures and call
//! counters, plus fixtures for device input.

#![allow(dead_code)]

use async_trait::async_trait;
use devreg_core::error::{Error, ErrorKind, Layer, Result};
use devreg_core::model::{Device, DeviceAttributes, DeviceChanges};
use devreg_core::store::MemoryDeviceStore;
use devreg_core::traits::DeviceStore;
use devreg_core::{AssociationListener, ListenerConfig, ListenerEvent, MutationEngine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A DeviceStore backed by a MemoryDeviceStore that can be told to fail
///
/// Clones share the same table, injected failures and counters.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryDeviceStore,
    failures: Arc<Mutex<HashMap<&'static str, ErrorKind>>>,
    calls: Arc<Mutex<HashMap<&'static str, Arc<AtomicUsize>>>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` fail with an error of `kind`
    pub fn fail_on(&self, operation: &'static str, kind: ErrorKind) {
        self.failures.lock().unwrap().insert(operation, kind);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of times `operation` was called
    pub fn call_count(&self, operation: &'static str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// The backing table, bypassing injection and counters
    pub fn inner(&self) -> &MemoryDeviceStore {
        &self.inner
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .fetch_add(1, Ordering::SeqCst);

        let injected = self.failures.lock().unwrap().get(operation).copied();
        match injected {
            None => Ok(()),
            Some(kind) => Err(injected_error(kind).tagged(Layer::Store, operation)),
        }
    }
}

fn injected_error(kind: ErrorKind) -> Error {
    match kind {
        ErrorKind::Validation => Error::invalid("injected validation failure"),
        ErrorKind::NotFound => Error::not_found("injected missing record"),
        ErrorKind::Unmarshal => Error::unmarshal("injected corrupt item"),
        ErrorKind::Store => Error::store_with(
            "injected store failure",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "throttled"),
        ),
        ErrorKind::Internal => Error::internal("injected internal failure"),
    }
}

#[async_trait]
impl DeviceStore for FaultyStore {
    async fn get(&self, id: &str) -> Result<Device> {
        self.enter("get")?;
        self.inner.get(id).await
    }

    async fn scan(&self) -> Result<Vec<Device>> {
        self.enter("scan")?;
        self.inner.scan().await
    }

    async fn put(&self, device: Device) -> Result<Device> {
        self.enter("put")?;
        self.inner.put(device).await
    }

    async fn merge_update(&self, id: &str, changes: &DeviceChanges) -> Result<Device> {
        self.enter("merge_update")?;
        self.inner.merge_update(id, changes).await
    }

    async fn patch_home_id(&self, id: &str, home_id: &str) -> Result<()> {
        self.enter("patch_home_id")?;
        self.inner.patch_home_id(id, home_id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.enter("delete")?;
        self.inner.delete(id).await
    }
}

/// Engine over a fresh FaultyStore, returning both
pub fn faulty_engine() -> (MutationEngine, FaultyStore) {
    let store = FaultyStore::new();
    (MutationEngine::new(Arc::new(store.clone())), store)
}

/// Listener over a fresh FaultyStore
pub fn faulty_listener() -> (
    AssociationListener,
    MutationEngine,
    FaultyStore,
    mpsc::Receiver<ListenerEvent>,
) {
    let (engine, store) = faulty_engine();
    let (listener, events) = AssociationListener::new(engine.clone(), ListenerConfig::default())
        .expect("default listener config is valid");
    (listener, engine, store, events)
}

pub fn thermo_attrs() -> DeviceAttributes {
    DeviceAttributes::new("00:11:22:33:44:55", "Thermo", "thermostat", "home-1")
}

pub fn camera_attrs(home_id: &str) -> DeviceAttributes {
    DeviceAttributes::new("AA-BB-CC-DD-EE-FF", "Porch Camera", "camera", home_id)
}

/// JSON body of a home association notification
pub fn association_body(device_id: &str, home_id: &str) -> String {
    serde_json::json!({
        "deviceId": device_id,
        "homeId": home_id,
        "action": "home_changed",
    })
    .to_string()
}

/// Drain every event currently buffered on the channel
pub fn drain(events: &mut mpsc::Receiver<ListenerEvent>) -> Vec<ListenerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
