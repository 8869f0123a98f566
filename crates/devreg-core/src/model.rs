//! Device record and the input shapes that produce or mutate it

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Milliseconds since the Unix epoch
pub type Millis = i64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// Timestamp for a write that follows one stamped `previous`
///
/// Never earlier than the clock and always strictly after `previous`, so two
/// writes landing in the same millisecond (or a clock stepping backwards) still
/// move `modifiedAt` forward.
pub fn next_modified_at(previous: Millis) -> Millis {
    now_millis().max(previous.saturating_add(1))
}

/// Device category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Thermostat,
    Light,
    Camera,
    Sensor,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Thermostat,
        DeviceType::Light,
        DeviceType::Camera,
        DeviceType::Sensor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Thermostat => "thermostat",
            DeviceType::Light => "light",
            DeviceType::Camera => "camera",
            DeviceType::Sensor => "sensor",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known device type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDeviceType(pub String);

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownDeviceType(s.to_string()))
    }
}

/// A persisted device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub mac: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub home_id: String,
    pub created_at: Millis,
    pub modified_at: Millis,
}

impl Device {
    /// Assign identity and timestamps to validated attributes
    ///
    /// Called by the store layer only; callers never choose an `id`.
    pub fn register(new_device: NewDevice) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            mac: new_device.mac,
            name: new_device.name,
            device_type: new_device.device_type,
            home_id: new_device.home_id,
            created_at: now,
            modified_at: now,
        }
    }

    /// Merge the present fields of `changes` onto this record
    ///
    /// Returns `false` (and leaves the record untouched) when `changes`
    /// carries no mutable field. Does not advance `modified_at`; see [`touch`].
    ///
    /// [`touch`]: Device::touch
    pub fn apply(&mut self, changes: &DeviceChanges) -> bool {
        if changes.is_empty() {
            return false;
        }
        if let Some(mac) = changes.mac.as_deref().filter(|v| !v.is_empty()) {
            self.mac = mac.to_string();
        }
        if let Some(name) = changes.name.as_deref().filter(|v| !v.is_empty()) {
            self.name = name.to_string();
        }
        if let Some(device_type) = changes.device_type {
            self.device_type = device_type;
        }
        if let Some(home_id) = changes.home_id.as_deref().filter(|v| !v.is_empty()) {
            self.home_id = home_id.to_string();
        }
        true
    }

    /// Advance `modified_at` past its current value
    pub fn touch(&mut self) {
        self.modified_at = next_modified_at(self.modified_at);
    }
}

/// Unvalidated creation input, as deserialized from a request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub home_id: Option<String>,
}

impl DeviceAttributes {
    pub fn new(
        mac: impl Into<String>,
        name: impl Into<String>,
        device_type: impl Into<String>,
        home_id: impl Into<String>,
    ) -> Self {
        Self {
            mac: Some(mac.into()),
            name: Some(name.into()),
            device_type: Some(device_type.into()),
            home_id: Some(home_id.into()),
        }
    }
}

/// Validated creation input, ready for identity assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    pub mac: String,
    pub name: String,
    pub device_type: DeviceType,
    pub home_id: String,
}

/// Unvalidated partial update, as deserialized from a request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_id: Option<String>,
}

impl DevicePatch {
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_home_id(mut self, home_id: impl Into<String>) -> Self {
        self.home_id = Some(home_id.into());
        self
    }

    /// No mutable field supplied
    pub fn is_empty(&self) -> bool {
        self.mac.is_none() && self.name.is_none() && self.device_type.is_none() && self.home_id.is_none()
    }
}

/// Validated set of field changes handed to the store's merge primitive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceChanges {
    pub mac: Option<String>,
    pub name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub home_id: Option<String>,
}

impl DeviceChanges {
    /// Only a home association change
    pub fn home_id(home_id: impl Into<String>) -> Self {
        Self {
            home_id: Some(home_id.into()),
            ..Self::default()
        }
    }

    /// True when no mutable field is set to a non-empty value
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(str::is_empty);
        blank(&self.mac) && blank(&self.name) && self.device_type.is_none() && blank(&self.home_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Device {
        Device::register(NewDevice {
            mac: "00:11:22:33:44:55".to_string(),
            name: "Thermo".to_string(),
            device_type: DeviceType::Thermostat,
            home_id: "home-1".to_string(),
        })
    }

    #[test]
    fn register_assigns_identity_and_equal_timestamps() {
        let device = sample();
        assert!(Uuid::parse_str(&device.id).is_ok());
        assert_eq!(device.created_at, device.modified_at);
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut device = sample();
        let changes = DeviceChanges {
            name: Some("Thermo2".to_string()),
            mac: Some(String::new()),
            ..DeviceChanges::default()
        };

        assert!(device.apply(&changes));
        assert_eq!(device.name, "Thermo2");
        assert_eq!(device.mac, "00:11:22:33:44:55");
        assert_eq!(device.home_id, "home-1");
        assert_eq!(device.device_type, DeviceType::Thermostat);
    }

    #[test]
    fn apply_with_nothing_set_is_a_no_op() {
        let mut device = sample();
        let before = device.clone();
        assert!(!device.apply(&DeviceChanges::default()));
        assert_eq!(device, before);
    }

    #[test]
    fn touch_moves_forward_even_from_the_future() {
        let mut device = sample();
        let far_future = now_millis() + 60_000;
        device.modified_at = far_future;
        device.touch();
        assert_eq!(device.modified_at, far_future + 1);
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "thermostat");
        assert_eq!(json["homeId"], "home-1");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("modifiedAt").is_some());
    }

    #[test]
    fn device_type_parses_known_names_only() {
        assert_eq!("camera".parse::<DeviceType>(), Ok(DeviceType::Camera));
        assert!("toaster".parse::<DeviceType>().is_err());
        assert!("Camera".parse::<DeviceType>().is_err());
    }
}
