// # devreg-core
//
// Core library for the device registry.
//
// ## Architecture Overview
//
// This library provides the functionality behind device registration and
// home association:
// - **DeviceStore**: Trait for single-table record persistence with atomic
//   read-modify-write primitives
// - **MutationEngine**: Validated create/get/list/update/delete plus home
//   association updates
// - **AssociationListener**: Consumer of batched home association
//   notifications with per-message failure reporting
// - **StoreRegistry**: Plugin-based registry for store backends
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Validation lives in the engine, persistence in
//    the store, delivery in the listener
// 2. **Single-Primitive Writes**: Every mutation is one store call, so
//    concurrent writers of a record serialize in the store
// 3. **Plugin-Based**: Stores are registered by name, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod model;
pub mod registry;
pub mod store;
pub mod traits;
pub mod validation;

// Re-export core types for convenience
pub use config::{ListenerConfig, RegistryConfig, StoreConfig};
pub use engine::MutationEngine;
pub use error::{Error, ErrorKind, Layer, Result};
pub use listener::{AssociationEvent, AssociationListener, BatchReport, DeliveredMessage, ListenerEvent};
pub use model::{Device, DeviceAttributes, DevicePatch, DeviceType};
pub use registry::StoreRegistry;
pub use store::{FileDeviceStore, MemoryDeviceStore};
pub use traits::{DeviceStore, DeviceStoreFactory};
