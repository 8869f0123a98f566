//! Contract Test: Registry Scenarios
//!
//! End-to-end flows through the engine and listener over a shared store.
//!
//! Constraints verified:
//! - A created device reads back identically
//! - A partial update preserves the fields it does not name
//! - A home association message updates only `homeId` and `modifiedAt`
//! - A deleted device is gone
//! - Listing an empty table reports NotFound

mod common;

use common::*;
use devreg_core::error::ErrorKind;
use devreg_core::model::{DevicePatch, DeviceType};
use devreg_core::store::FileDeviceStore;
use devreg_core::{DeviceStore, MutationEngine};
use std::sync::Arc;

#[tokio::test]
async fn create_then_get() {
    let (engine, _store) = faulty_engine();

    let created = engine.create(thermo_attrs()).await.unwrap();
    assert!(!created.id.is_empty());
    assert_eq!(created.device_type, DeviceType::Thermostat);
    assert_eq!(created.created_at, created.modified_at);

    let fetched = engine.get(&created.id).await.unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn partial_update_preserves_mac() {
    let (engine, _store) = faulty_engine();
    let created = engine.create(thermo_attrs()).await.unwrap();

    let updated = engine
        .update(&created.id, DevicePatch::default().with_name("Thermo2"))
        .await
        .unwrap();

    assert_eq!(updated.name, "Thermo2");
    assert_eq!(updated.mac, created.mac);
    assert!(updated.modified_at > created.modified_at);
}

#[tokio::test]
async fn async_home_association() {
    let (listener, engine, _store, _events) = faulty_listener();
    let created = engine.create(thermo_attrs()).await.unwrap();

    listener
        .process_message(&association_body(&created.id, "home-2"))
        .await
        .unwrap();

    let stored = engine.get(&created.id).await.unwrap();
    assert_eq!(stored.home_id, "home-2");
    assert_eq!(stored.name, created.name);
    assert_eq!(stored.mac, created.mac);
    assert_eq!(stored.device_type, created.device_type);
    assert_eq!(stored.created_at, created.created_at);
    assert!(stored.modified_at > created.modified_at);
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let (engine, _store) = faulty_engine();
    let created = engine.create(thermo_attrs()).await.unwrap();

    engine.delete(&created.id).await.unwrap();

    let err = engine.get(&created.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!err.is_retryable());

    let err = engine.delete(&created.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn list_on_empty_store_is_not_found() {
    let (engine, _store) = faulty_engine();

    let err = engine.list().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let first = engine.create(thermo_attrs()).await.unwrap();
    let second = engine.create(camera_attrs("home-7")).await.unwrap();
    let listed = engine.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first));
    assert!(listed.contains(&second));
}

#[tokio::test]
async fn file_backed_registry_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry").join("devices.json");

    let created = {
        let store: Arc<dyn DeviceStore> =
            Arc::new(FileDeviceStore::open(&path, "devices").await.unwrap());
        let engine = MutationEngine::new(store);
        let created = engine.create(thermo_attrs()).await.unwrap();
        engine
            .update_home_association(&created.id, "home-5")
            .await
            .unwrap();
        created
    };

    let store: Arc<dyn DeviceStore> =
        Arc::new(FileDeviceStore::open(&path, "devices").await.unwrap());
    let engine = MutationEngine::new(store);
    let stored = engine.get(&created.id).await.unwrap();

    assert_eq!(stored.home_id, "home-5");
    assert_eq!(stored.created_at, created.created_at);
}
