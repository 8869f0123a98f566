// # File Device Store
//
// File-based implementation of DeviceStore with crash recovery.
//
// ## Purpose
//
// Persists the device table on a single node. Several handles (in one
// process or in several) may share one table file.
//
// ## Consistency
//
// The store keeps no copy of the table between calls. Every operation takes an
// exclusive advisory lock on `<table>.lock` and loads the table from disk.
// Mutations hand the lock to a blocking write task that releases it after the
// rename. Reads therefore always see the latest committed write of any handle.
// A future dropped before the write starts leaves the table as it was; once
// the write has started it completes under the lock.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates the JSON document on load
// - Automatic backup: Keeps .backup of last known good table
// - Recovery: Falls back to backup if corruption detected
//
// ## Item Corruption
//
// Items are held as raw JSON and decoded on every read. One bad item does not
// prevent the table from loading; it fails reads of that id with `Unmarshal`
// and is skipped by scans.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "table": "devices",
//   "items": {
//     "6f1c…": {
//       "id": "6f1c…",
//       "mac": "00:11:22:33:44:55",
//       "name": "Thermo",
//       "type": "thermostat",
//       "homeId": "home-1",
//       "createdAt": 1736424000000,
//       "modifiedAt": 1736424000000
//     }
//   }
// }
// ```

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, ErrorKind, Layer, Result};
use crate::model::{Device, DeviceChanges};
use crate::traits::device_store::{DeviceStore, DeviceStoreFactory};

/// Table file format version
/// Used for future migration if format changes
const TABLE_FILE_VERSION: &str = "1.0";

type Items = HashMap<String, Value>;

/// File-based device store with crash recovery
///
/// Every operation runs under an exclusive lock on the table's lock file and
/// works on a fresh load of the table. A mutation that fails to write (or is
/// cancelled before the rename) leaves the table file untouched.
///
/// # Example
///
/// ```rust,no_run
/// use devreg_core::store::FileDeviceStore;
/// use devreg_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileDeviceStore::open("/var/lib/devreg/devices.json", "devices").await?;
///     let devices = store.scan().await?;
///     println!("{} devices", devices.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileDeviceStore {
    path: PathBuf,
    table: String,
}

/// Serializable table file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TableFile {
    version: String,
    table: String,
    items: Items,
}

/// Exclusive advisory lock on a table, released on drop
struct TableLock {
    file: std::fs::File,
}

impl TableLock {
    async fn acquire(path: PathBuf) -> Result<Self> {
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| {
                    Error::store_with(format!("failed to open lock file {}", path.display()), e)
                })?;
            file.lock_exclusive().map_err(|e| {
                Error::store_with(format!("failed to lock {}", path.display()), e)
            })?;
            Ok(Self { file })
        })
        .await
        .map_err(|e| Error::internal(format!("table lock task failed: {e}")))?
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release table lock");
        }
    }
}

impl FileDeviceStore {
    /// Create or load a file device store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing table file
    /// 3. If corruption detected, try to load from backup
    /// 4. If both fail, start with an empty table
    pub async fn open<P: AsRef<Path>>(path: P, table: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = table.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::store_with(
                    format!("failed to create table directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let store = Self { path, table };
        let (_lock, items) = store.lock_and_load().await?;
        info!(
            table = %store.table,
            path = %store.path.display(),
            items = items.len(),
            "device table opened"
        );

        Ok(store)
    }

    /// Logical table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Take the table lock and load the current table
    ///
    /// The table must only be written while the returned lock is alive;
    /// [`write`](Self::write) takes it over.
    async fn lock_and_load(&self) -> Result<(TableLock, Items)> {
        let lock = TableLock::acquire(self.lock_path()).await?;
        let items = Self::load_with_recovery(&self.path, &self.table).await?;
        Ok((lock, items))
    }

    /// Load the table with automatic recovery
    ///
    /// Only an unparseable document triggers recovery; an unreadable file
    /// (permissions, I/O) is reported to the caller.
    async fn load_with_recovery(path: &Path, table: &str) -> Result<Items> {
        let err = match Self::load(path, table).await {
            Ok(items) => return Ok(items),
            Err(e) if e.kind() == ErrorKind::Unmarshal => e,
            Err(e) => return Err(e),
        };

        warn!(error = %err, "table file appears corrupted, attempting recovery from backup");

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            warn!("no backup file found, starting with an empty table");
            return Ok(Items::new());
        }

        match Self::load(&backup_path, table).await {
            Ok(items) => {
                info!(items = items.len(), "recovered table from backup");
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    error!(error = %restore_err, "failed to restore table file from backup");
                }
                Ok(items)
            }
            Err(backup_err) => {
                error!(error = %backup_err, "backup also corrupted, starting with an empty table");
                Ok(Items::new())
            }
        }
    }

    /// Load the table from a file
    async fn load(path: &Path, table: &str) -> Result<Items> {
        if !path.exists() {
            debug!(path = %path.display(), "table file does not exist");
            return Ok(Items::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store_with(format!("failed to read table file {}", path.display()), e)
        })?;

        let file: TableFile = serde_json::from_str(&content).map_err(|e| {
            Error::unmarshal_with(format!("failed to parse table file {}", path.display()), e)
        })?;

        if file.version != TABLE_FILE_VERSION {
            warn!(
                expected = TABLE_FILE_VERSION,
                found = %file.version,
                "table file version mismatch, attempting to load anyway"
            );
        }
        if file.table != table {
            warn!(expected = %table, found = %file.table, "table file holds a different table name");
        }

        Ok(file.items)
    }

    /// Write the table to disk atomically
    ///
    /// Consumes the table lock. The write runs to completion on the blocking
    /// pool and releases the lock afterwards, even if the caller stops
    /// waiting. Nothing is visible to other handles until the final rename.
    async fn write(&self, lock: TableLock, items: Items) -> Result<()> {
        let file = TableFile {
            version: TABLE_FILE_VERSION.to_string(),
            table: self.table.clone(),
            items,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store_with("failed to serialize table", e))?;

        let path = self.path.clone();
        let temp_path = self.temp_path();
        tokio::task::spawn_blocking(move || {
            let result = Self::replace_table(&path, &temp_path, json.as_bytes());
            drop(lock);
            result
        })
        .await
        .map_err(|e| Error::internal(format!("table write task failed: {e}")))??;

        tracing::trace!(path = %self.path.display(), "table written");
        Ok(())
    }

    /// Write-then-rename with a backup of the previous table
    fn replace_table(path: &Path, temp_path: &Path, contents: &[u8]) -> Result<()> {
        {
            let mut temp = std::fs::File::create(temp_path).map_err(|e| {
                Error::store_with(format!("failed to create temp file {}", temp_path.display()), e)
            })?;
            temp.write_all(contents).map_err(|e| {
                Error::store_with(format!("failed to write temp file {}", temp_path.display()), e)
            })?;
            temp.sync_all().map_err(|e| {
                Error::store_with(format!("failed to sync temp file {}", temp_path.display()), e)
            })?;
        }

        if path.exists()
            && let Err(e) = std::fs::copy(path, Self::backup_path(path))
        {
            warn!(error = %e, "failed to create backup");
        }

        std::fs::rename(temp_path, path).map_err(|e| {
            Error::store_with(
                format!("failed to rename {} to {}", temp_path.display(), path.display()),
                e,
            )
        })
    }

    /// Tag a failure with this table and the record it concerns
    fn fail(&self, err: Error, operation: &'static str, id: Option<&str>) -> Error {
        let err = err.tagged(Layer::Store, operation);
        let err = match id {
            Some(id) => err.with_context("device_id", id),
            None => err,
        };
        err.with_context("table", self.table.as_str())
    }

    fn decode(id: &str, raw: &Value) -> Result<Device> {
        serde_json::from_value(raw.clone())
            .map_err(|e| Error::unmarshal_with(format!("item {id} is not a device record"), e))
    }

    fn encode(device: &Device) -> Result<Value> {
        serde_json::to_value(device).map_err(|e| Error::store_with("failed to marshal device data", e))
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to the advisory lock file
    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone();
        lock.set_extension("lock");
        lock
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

fn missing(id: &str) -> Error {
    Error::not_found(format!("device {id}"))
}

#[async_trait]
impl DeviceStore for FileDeviceStore {
    async fn get(&self, id: &str) -> Result<Device> {
        let tag = |e: Error| self.fail(e, "get", Some(id));

        let (_lock, items) = self.lock_and_load().await.map_err(tag)?;
        let raw = items.get(id).ok_or_else(|| tag(missing(id)))?;
        Self::decode(id, raw).map_err(tag)
    }

    async fn scan(&self) -> Result<Vec<Device>> {
        let tag = |e: Error| self.fail(e, "scan", None);

        let (_lock, items) = self.lock_and_load().await.map_err(tag)?;
        if items.is_empty() {
            return Err(tag(Error::not_found("no devices found")));
        }

        let mut devices = Vec::with_capacity(items.len());
        for (id, raw) in items.iter() {
            match Self::decode(id, raw) {
                Ok(device) => devices.push(device),
                Err(e) => warn!(device_id = %id, error = %e, "skipping undecodable item"),
            }
        }

        if devices.is_empty() {
            return Err(tag(Error::unmarshal(format!(
                "none of {} items could be decoded",
                items.len()
            ))));
        }

        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        debug!(count = devices.len(), "scanned devices");
        Ok(devices)
    }

    async fn put(&self, device: Device) -> Result<Device> {
        let tag = |e: Error| self.fail(e, "put", Some(&device.id));

        let value = Self::encode(&device).map_err(tag)?;
        let (lock, mut items) = self.lock_and_load().await.map_err(tag)?;
        items.insert(device.id.clone(), value);
        self.write(lock, items).await.map_err(tag)?;

        debug!(device_id = %device.id, "stored device");
        Ok(device)
    }

    async fn merge_update(&self, id: &str, changes: &DeviceChanges) -> Result<Device> {
        let tag = |e: Error| self.fail(e, "merge_update", Some(id));

        let (lock, mut items) = self.lock_and_load().await.map_err(tag)?;
        let raw = items.get(id).ok_or_else(|| tag(missing(id)))?;
        let mut device = Self::decode(id, raw).map_err(tag)?;

        if !device.apply(changes) {
            debug!(device_id = %id, "no mutable fields in update, skipping write");
            return Ok(device);
        }
        device.touch();

        items.insert(id.to_string(), Self::encode(&device).map_err(tag)?);
        self.write(lock, items).await.map_err(tag)?;
        Ok(device)
    }

    async fn patch_home_id(&self, id: &str, home_id: &str) -> Result<()> {
        let tag = |e: Error| self.fail(e, "patch_home_id", Some(id));

        let (lock, mut items) = self.lock_and_load().await.map_err(tag)?;
        let raw = items.get(id).ok_or_else(|| tag(missing(id)))?;
        let mut device = Self::decode(id, raw).map_err(tag)?;

        device.home_id = home_id.to_string();
        device.touch();

        items.insert(id.to_string(), Self::encode(&device).map_err(tag)?);
        self.write(lock, items).await.map_err(tag)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let tag = |e: Error| self.fail(e, "delete", Some(id));

        let (lock, mut items) = self.lock_and_load().await.map_err(tag)?;
        if items.remove(id).is_none() {
            return Err(tag(missing(id)));
        }
        self.write(lock, items).await.map_err(tag)
    }
}

/// Factory for the `file` store type
#[derive(Debug, Default)]
pub struct FileDeviceStoreFactory;

#[async_trait]
impl DeviceStoreFactory for FileDeviceStoreFactory {
    async fn create(&self, config: &Value) -> Result<Arc<dyn DeviceStore>> {
        let config: StoreConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::config(format!("invalid file store config: {e}")))?;
        match config {
            StoreConfig::File { path, table } => Ok(Arc::new(FileDeviceStore::open(path, table).await?)),
            other => Err(Error::config(format!(
                "file store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
