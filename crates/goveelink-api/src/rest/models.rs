// Wire models for the Govee app REST API.
//
// Every response shares a `{ status, message, ... }` envelope; the payload
// sits beside those fields under an endpoint-specific key (`client`, `data`,
// `devices`), so the envelope flattens the payload struct into itself.

use serde::{Deserialize, Serialize};

// ── Envelope ─────────────────────────────────────────────────────────

/// Common response envelope. `status` mirrors the HTTP status on success
/// but the API also reports failures here with an HTTP 200.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub payload: T,
}

// ── Login ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub client: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginPayload {
    pub client: LoginClient,
}

/// Account session returned by a credential login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginClient {
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Account-wide IoT topic that receives status for every device.
    #[serde(default)]
    pub topic: String,
    /// Token lifetime in hours.
    pub token_expire_cycle: i64,
    #[serde(default, rename = "accountId")]
    pub account_id: Option<i64>,
}

// ── Token refresh ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenRefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenRefreshPayload {
    pub data: TokenRefresh,
}

/// Replacement tokens returned by `refresh-tokens`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefresh {
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Token lifetime in hours.
    pub token_expire_cycle: i64,
}

// ── Device list ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceListPayload {
    #[serde(default)]
    pub devices: Vec<AppDevice>,
}

/// A device as listed by the account's device endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDevice {
    pub group_id: i64,
    pub device: String,
    pub sku: String,
    pub spec: String,
    pub version_hard: String,
    pub version_soft: String,
    pub device_name: String,
    pub pact_type: i64,
    pub pact_code: i64,
    pub goods_type: i64,
    pub device_ext: DeviceExtension,
}

/// Extension blob attached to each device. Each field is itself a
/// JSON document encoded as a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceExtension {
    pub device_settings: String,
    pub last_device_data: String,
    pub ext_resources: String,
}

/// Decoded `deviceExt.deviceSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDeviceSettings {
    pub wifi_name: Option<String>,
    pub wifi_mac: Option<String>,
    pub ble_name: Option<String>,
    /// Per-device IoT topic used to publish commands.
    pub topic: Option<String>,
    /// BLE MAC address.
    pub address: Option<String>,
    pub pact_type: i64,
    pub pact_code: i64,
    pub wifi_soft_version: Option<String>,
    pub wifi_hard_version: Option<String>,
    pub version_hard: Option<String>,
    pub version_soft: Option<String>,
    pub ic: Option<i64>,
    pub secret_code: Option<String>,
    pub device: Option<String>,
    pub device_name: Option<String>,
    pub sku: Option<String>,
    pub water_shortage_on_off: Option<i64>,
}

/// Decoded `deviceExt.lastDeviceData`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDeviceData {
    pub online: Option<bool>,
    pub on_off: Option<i64>,
}

impl AppDevice {
    /// Decode the embedded settings document.
    pub fn settings(&self) -> Result<AppDeviceSettings, serde_json::Error> {
        if self.device_ext.device_settings.trim().is_empty() {
            return Ok(AppDeviceSettings::default());
        }
        serde_json::from_str(&self.device_ext.device_settings)
    }

    /// Decode the last-known data snapshot, if the API sent one.
    pub fn last_data(&self) -> Option<AppDeviceData> {
        let raw = self.device_ext.last_device_data.trim();
        if raw.is_empty() {
            return None;
        }
        serde_json::from_str(raw).ok()
    }
}
