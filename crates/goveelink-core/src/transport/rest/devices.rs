// ── Device list adapter ──
//
// Turns `devices/v1/list` entries into `DeviceConfig`s for the registry.
// The interesting fields live in `deviceExt.deviceSettings`, a JSON
// document nested inside a string.

use std::collections::HashSet;

use goveelink_api::ble::normalize_address;
use goveelink_api::rest::AppDevice;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{BusEvent, BusReceiver, EventBus, Topic};
use crate::model::{DeviceConfig, RawDeviceState};

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Build the registry's view of one listed device.
pub fn device_config(device: &AppDevice) -> Result<DeviceConfig, serde_json::Error> {
    let settings = device.settings()?;
    let name = non_empty(settings.device_name)
        .or_else(|| non_empty(Some(device.device_name.clone())))
        .unwrap_or_default();

    Ok(DeviceConfig {
        device_id: device.device.clone(),
        model: device.sku.clone(),
        name,
        ble_address: non_empty(settings.address).map(|a| normalize_address(&a)),
        ble_name: non_empty(settings.ble_name),
        iot_topic: non_empty(settings.topic),
        wifi_mac: non_empty(settings.wifi_mac),
        hardware_version: non_empty(settings.wifi_hard_version)
            .or(non_empty(settings.version_hard))
            .or_else(|| non_empty(Some(device.version_hard.clone()))),
        software_version: non_empty(settings.wifi_soft_version)
            .or(non_empty(settings.version_soft))
            .or_else(|| non_empty(Some(device.version_soft.clone()))),
        pact_type: device.pact_type,
        pact_code: device.pact_code,
    })
}

/// Configs for every listed device that parses and is not ignored.
pub fn device_configs(devices: &[AppDevice], ignored: &HashSet<String>) -> Vec<DeviceConfig> {
    devices
        .iter()
        .filter(|d| {
            let skip = ignored.contains(&d.device);
            if skip {
                debug!(device_id = %d.device, "device ignored by configuration");
            }
            !skip
        })
        .filter_map(|d| match device_config(d) {
            Ok(config) if !config.device_id.is_empty() => Some(config),
            Ok(_) => None,
            Err(e) => {
                warn!(device_id = %d.device, sku = %d.sku, error = %e, "unparsable device settings, skipping");
                None
            }
        })
        .collect()
}

/// Publishes `DEVICE.RECEIVED.Settings` for every device in a list response,
/// followed by whatever last-known state the list carried.
pub struct RestDeviceProcessor {
    bus: EventBus,
    inbox: BusReceiver,
    ignored: HashSet<String>,
}

impl RestDeviceProcessor {
    pub const INPUTS: &'static [Topic] = &[Topic::RestDeviceList];
    pub const OUTPUTS: &'static [Topic] = &[Topic::DeviceSettingsReceived, Topic::DeviceStateReceived];

    pub fn new(bus: EventBus, ignored: HashSet<String>) -> Self {
        Self {
            inbox: bus.subscribe(Self::INPUTS),
            bus,
            ignored,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    self.handle(&event);
                }
            }
        }
    }

    pub fn handle(&self, event: &BusEvent) {
        let BusEvent::RestDeviceList(devices) = event else {
            return;
        };
        for config in device_configs(devices, &self.ignored) {
            self.bus.publish(BusEvent::DeviceSettingsReceived(config));
        }
        for device in devices.iter().filter(|d| !self.ignored.contains(&d.device)) {
            let Some(data) = device.last_data() else {
                continue;
            };
            let mut state = RawDeviceState::new(device.device.clone());
            state.model = Some(device.sku.clone());
            state.on_off = data.on_off.map(|v| v == 1);
            state.connected = data.online;
            if state.on_off.is_some() || state.connected.is_some() {
                self.bus.publish(BusEvent::DeviceStateReceived(state));
            }
        }
    }
}
