// ── Transport-neutral device payloads ──
//
// What transport adapters hand to the registry (settings and raw state) and
// what the registry hands back to transports (state-request targets).

use serde::{Deserialize, Serialize};

use crate::color::ColorRgb;

/// Identity and addressing for a device, as learned from the account's
/// device list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    /// Vendor SKU, e.g. `H6160`.
    pub model: String,
    pub name: String,
    /// BLE MAC address, upper-case.
    pub ble_address: Option<String>,
    pub ble_name: Option<String>,
    /// Per-device cloud topic.
    pub iot_topic: Option<String>,
    pub wifi_mac: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub pact_type: i64,
    pub pact_code: i64,
}

/// A normalized state update for one device.
///
/// `commands` holds raw report frames for opcode-based devices; the scalar
/// fields are filled by transports that report structured state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeviceState {
    pub device_id: String,
    pub model: Option<String>,
    /// Vendor command name the update arrived with (`status`, `ptReal`, …).
    pub command: Option<String>,
    pub on_off: Option<bool>,
    /// Percent, 0–100.
    pub brightness: Option<u8>,
    /// Colour temperature in kelvin.
    pub color_temperature: Option<u32>,
    pub mode: Option<u8>,
    pub color: Option<ColorRgb>,
    pub connected: Option<bool>,
    pub commands: Vec<Vec<u8>>,
}

impl RawDeviceState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// A state carrying report frames only.
    pub fn with_frames(device_id: impl Into<String>, frames: Vec<Vec<u8>>) -> Self {
        Self {
            commands: frames,
            ..Self::new(device_id)
        }
    }
}

/// Everything a transport needs to query one device's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub device_id: String,
    pub model: String,
    pub ble_address: Option<String>,
    pub iot_topic: Option<String>,
    /// Identifier prefixes of every capability the device carries.
    pub status_codes: Vec<Vec<u8>>,
}
