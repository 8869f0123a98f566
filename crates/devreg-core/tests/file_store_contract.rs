//! Contract Test: Shared File Table
//!
//! This test verifies that several FileDeviceStore handles opened on one table
//! file behave as a single table.
//!
//! Constraints verified:
//! - A write through one handle is visible to every other handle
//! - Concurrent merges through different handles never lose a field
//! - An operation abandoned mid-flight leaves the handle agreeing with disk
//!
//! If this test fails, someone has:
//! - Cached the table in a handle instead of loading it under the lock
//! - Mutated the table before the write to disk succeeded

mod common;

use common::*;
use devreg_core::model::DevicePatch;
use devreg_core::store::FileDeviceStore;
use devreg_core::{DeviceStore, MutationEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

async fn open(path: &std::path::Path) -> FileDeviceStore {
    assert_ok!(FileDeviceStore::open(path, "devices").await)
}

#[tokio::test]
async fn records_created_through_either_handle_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let api = MutationEngine::new(Arc::new(open(&path).await));
    let listener = MutationEngine::new(Arc::new(open(&path).await));

    let a = assert_ok!(api.create(thermo_attrs()).await);
    let b = assert_ok!(listener.create(camera_attrs("home-1")).await);

    assert_eq!(assert_ok!(listener.get(&a.id).await), a);
    assert_eq!(assert_ok!(api.get(&b.id).await), b);

    let reopened = open(&path).await;
    assert_eq!(assert_ok!(reopened.scan().await).len(), 2);
}

#[tokio::test]
async fn home_association_through_one_handle_is_read_by_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let api = MutationEngine::new(Arc::new(open(&path).await));
    let listener = MutationEngine::new(Arc::new(open(&path).await));

    let created = assert_ok!(api.create(camera_attrs("home-1")).await);
    assert_ok!(listener.update_home_association(&created.id, "home-2").await);

    let updated = assert_ok!(api.update(&created.id, DevicePatch::default().with_name("Garage")).await);
    assert_eq!(updated.home_id, "home-2");
    assert_eq!(updated.name, "Garage");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_through_different_handles_keep_both_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let api = MutationEngine::new(Arc::new(open(&path).await));
    let listener = MutationEngine::new(Arc::new(open(&path).await));
    let created = assert_ok!(api.create(camera_attrs("home-1")).await);

    for round in 0..10 {
        let name = format!("Camera {round}");
        let home = format!("home-{round}");

        let rename = {
            let api = api.clone();
            let id = created.id.clone();
            let name = name.clone();
            tokio::spawn(async move { api.update(&id, DevicePatch::default().with_name(name)).await })
        };
        let rehome = {
            let listener = listener.clone();
            let id = created.id.clone();
            let home = home.clone();
            tokio::spawn(async move { listener.update_home_association(&id, &home).await })
        };
        assert_ok!(rename.await.unwrap());
        assert_ok!(rehome.await.unwrap());

        let stored = assert_ok!(open(&path).await.get(&created.id).await);
        assert_eq!(stored.name, name, "round {round} lost the name");
        assert_eq!(stored.home_id, home, "round {round} lost the homeId");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_updates_leave_the_handle_consistent_with_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let store = Arc::new(open(&path).await);
    let engine = MutationEngine::new(store.clone());
    let created = assert_ok!(engine.create(thermo_attrs()).await);

    for i in 0..40u64 {
        let patch = DevicePatch::default().with_name(format!("Thermo {i}"));
        let _ = tokio::time::timeout(Duration::from_micros(i * 50), engine.update(&created.id, patch)).await;

        let seen = assert_ok!(store.get(&created.id).await);
        let on_disk = assert_ok!(open(&path).await.get(&created.id).await);
        assert_eq!(seen, on_disk, "iteration {i}");
        assert_eq!(seen.created_at, created.created_at);
    }

    // The handle is still usable after every abandoned call
    let last = assert_ok!(engine.update(&created.id, DevicePatch::default().with_name("Final")).await);
    assert_eq!(assert_ok!(open(&path).await.get(&created.id).await), last);
}
