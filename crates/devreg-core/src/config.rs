//! Configuration types for the device registry
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Device store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Association listener settings
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl RegistryConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.store.validate()?;
        self.listener.validate()?;
        Ok(())
    }
}

/// Device store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file holding the whole table
    File {
        /// Path to the table file
        path: String,
        /// Logical table name recorded in the file
        #[serde(default = "default_table")]
        table: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store registered under `factory`
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// File store with the default table name
    pub fn file(path: impl Into<String>) -> Self {
        StoreConfig::File {
            path: path.into(),
            table: default_table(),
        }
    }

    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path, table } => {
                if path.is_empty() {
                    return Err(crate::Error::config("File store path cannot be empty"));
                }
                if table.is_empty() {
                    return Err(crate::Error::config("File store table name cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom store config cannot be null"));
                }
                Ok(())
            }
            StoreConfig::Memory => Ok(()),
        }
    }

    /// Name the store factory is registered under
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Association listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Capacity of the listener's event channel
    ///
    /// When full, new listener events are dropped (with a warning log) rather
    /// than stalling message processing.
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ListenerConfig {
    /// Validate the listener configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config(
                "Listener event channel capacity must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_table() -> String {
    "devices".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}
