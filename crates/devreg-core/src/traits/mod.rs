//! Core traits for the device registry
//!
//! - [`DeviceStore`]: Single-table persistence of device records
//! - [`DeviceStoreFactory`]: Construction of stores from configuration

pub mod device_store;

pub use device_store::{DeviceStore, DeviceStoreFactory};
