//! Field rules for device input
//!
//! Each validator collects every violated rule before failing, so a caller
//! fixing a request sees all problems at once.

use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{DeviceAttributes, DeviceChanges, DevicePatch, DeviceType, NewDevice};

/// Maximum display name length, in characters
pub const MAX_NAME_LEN: usize = 100;

/// Maximum home identifier length
pub const MAX_HOME_ID_LEN: usize = 128;

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("MAC pattern compiles")
});

const MAC_REQUIRED: &str = "MAC address is required";
const MAC_FORMAT: &str = "MAC address format is invalid (expected format: XX:XX:XX:XX:XX:XX)";
const NAME_REQUIRED: &str = "name is required";
const NAME_LENGTH: &str = "name must be between 1 and 100 characters";
const TYPE_REQUIRED: &str = "type is required";
const TYPE_ENUM: &str = "type must be one of: thermostat, light, camera, sensor";
const HOME_ID_REQUIRED: &str = "homeId is required";
const HOME_ID_FORMAT: &str =
    "homeId must be 1-128 characters of letters, digits, '-' or '_'";
const UPDATE_EMPTY: &str =
    "at least one field (mac, name, type, or homeId) must be provided for update";

fn is_mac(value: &str) -> bool {
    MAC_PATTERN.is_match(value)
}

fn is_name(value: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&value.chars().count())
}

/// Home identifiers come from an external system: UUIDs and slugs both occur
pub fn is_home_id(value: &str) -> bool {
    (1..=MAX_HOME_ID_LEN).contains(&value.len())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check(violations: &mut Vec<String>, ok: bool, rule: &str) {
    if !ok {
        violations.push(rule.to_string());
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

// Field rules shared by creation and partial update. `None` means the field
// is absent or blank.

fn check_mac(violations: &mut Vec<String>, value: Option<&str>) {
    match value {
        None => violations.push(MAC_REQUIRED.to_string()),
        Some(mac) => check(violations, is_mac(mac), MAC_FORMAT),
    }
}

fn check_name(violations: &mut Vec<String>, value: Option<&str>) {
    match value {
        None => violations.push(NAME_REQUIRED.to_string()),
        Some(name) => check(violations, is_name(name), NAME_LENGTH),
    }
}

fn check_type(violations: &mut Vec<String>, value: Option<&str>) -> Option<DeviceType> {
    match value {
        None => {
            violations.push(TYPE_REQUIRED.to_string());
            None
        }
        Some(raw) => {
            let parsed = raw.parse::<DeviceType>().ok();
            check(violations, parsed.is_some(), TYPE_ENUM);
            parsed
        }
    }
}

fn check_home_id(violations: &mut Vec<String>, value: Option<&str>) {
    match value {
        None => violations.push(HOME_ID_REQUIRED.to_string()),
        Some(home_id) => check(violations, is_home_id(home_id), HOME_ID_FORMAT),
    }
}

/// Validate a device identifier: non-empty and a UUID
pub fn validate_device_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::invalid("device ID is required"));
    }
    if Uuid::parse_str(id).is_err() {
        return Err(Error::invalid("device ID must be a valid UUID"));
    }
    Ok(())
}

/// Validate creation input, reporting every violated rule
pub fn validate_new_device(attrs: &DeviceAttributes) -> Result<NewDevice> {
    let mut violations = Vec::new();

    let mac = present(&attrs.mac);
    check_mac(&mut violations, mac);
    let name = present(&attrs.name);
    check_name(&mut violations, name);
    let device_type = check_type(&mut violations, present(&attrs.device_type));
    let home_id = present(&attrs.home_id);
    check_home_id(&mut violations, home_id);

    match (mac, name, device_type, home_id) {
        (Some(mac), Some(name), Some(device_type), Some(home_id)) if violations.is_empty() => {
            Ok(NewDevice {
                mac: mac.to_string(),
                name: name.to_string(),
                device_type,
                home_id: home_id.to_string(),
            })
        }
        _ => Err(Error::validation(violations)),
    }
}

/// Validate a partial update, reporting every violated rule
///
/// Each supplied field must satisfy the creation rule for that field, blank
/// values included, and at least one field must be supplied.
pub fn validate_patch(patch: &DevicePatch) -> Result<DeviceChanges> {
    let mut violations = Vec::new();

    if patch.is_empty() {
        violations.push(UPDATE_EMPTY.to_string());
    }
    if patch.mac.is_some() {
        check_mac(&mut violations, present(&patch.mac));
    }
    if patch.name.is_some() {
        check_name(&mut violations, present(&patch.name));
    }
    let device_type = match patch.device_type {
        None => None,
        Some(_) => check_type(&mut violations, present(&patch.device_type)),
    };
    if patch.home_id.is_some() {
        check_home_id(&mut violations, present(&patch.home_id));
    }

    if !violations.is_empty() {
        return Err(Error::validation(violations));
    }

    Ok(DeviceChanges {
        mac: patch.mac.clone(),
        name: patch.name.clone(),
        device_type,
        home_id: patch.home_id.clone(),
    })
}
