// ── Bridge configuration ──
//
// Runtime settings for a `Bridge`. The config crate builds this from the
// TOML profile and environment; core never touches files.

use std::collections::HashSet;
use std::time::Duration;

use goveelink_api::{BleSettings, IotConfig, TransportConfig};
use secrecy::SecretString;

use crate::registry::DEFAULT_POLL_INTERVAL;
use crate::transport::rest::Credentials;

/// Which transports the bridge starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connections {
    pub api: bool,
    pub iot: bool,
    pub ble: bool,
}

impl Default for Connections {
    fn default() -> Self {
        Self {
            api: true,
            iot: true,
            ble: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub credentials: Credentials,
    /// Identifier sent with every account request.
    pub client_id: String,
    pub api_base_url: String,
    pub transport: TransportConfig,
    pub poll_interval: Duration,
    pub connections: Connections,
    /// Broker session; the cloud transport stays off without it.
    pub iot: Option<IotConfig>,
    pub ble: BleSettings,
    /// Log each peripheral's services while connecting.
    pub inspect_services: bool,
    /// Device ids skipped when the account's device list arrives.
    pub ignored_devices: HashSet<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials {
                username: String::new(),
                password: SecretString::from(String::new()),
            },
            client_id: String::new(),
            api_base_url: goveelink_api::rest::DEFAULT_BASE_URL.into(),
            transport: TransportConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connections: Connections::default(),
            iot: None,
            ble: BleSettings::default(),
            inspect_services: false,
            ignored_devices: HashSet::new(),
        }
    }
}

impl BridgeConfig {
    pub fn iot_enabled(&self) -> bool {
        self.connections.iot && self.iot.is_some()
    }
}
