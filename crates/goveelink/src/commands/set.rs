//! `goveelink set`: push one-off changes to a device.
//!
//! Starts the bridge, waits until the device has a live route (a connected
//! BLE peripheral or the cloud session), hands each change to the registry,
//! and waits for the matching dispatches before shutting down.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use goveelink_config::FileTokenStore;
use goveelink_core::codec::COMMAND_IDENTIFIER;
use goveelink_core::color::mired_to_kelvin;
use goveelink_core::{Bridge, BusEvent, BusReceiver, DeviceChange, GoveeDevice, Topic};

use crate::cli::{GlobalOpts, Power, SetArgs};
use crate::error::CliError;
use crate::output;

const WATCHED: &[Topic] = &[
    Topic::DeviceDiscovered,
    Topic::BlePeripheralConnection,
    Topic::IotConnection,
    Topic::BlePeripheralSend,
    Topic::IotDeviceSend,
    Topic::RestAuthenticationFailure,
];

/// Time left for queued radio writes after the last dispatch.
const FLUSH_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct Delivered {
    device_id: String,
    name: String,
    changes: Vec<DeviceChange>,
}

/// Changes in the order they are sent: power first, then level and colour.
pub fn changes(args: &SetArgs) -> Vec<DeviceChange> {
    let mut changes = Vec::new();
    if let Some(power) = args.power {
        changes.push(DeviceChange::Power {
            on: power == Power::On,
        });
    }
    if let Some(percent) = args.brightness {
        changes.push(DeviceChange::Brightness { percent });
    }
    if let Some(color) = args.color.or(args.hsv) {
        changes.push(DeviceChange::Color { color });
    }
    if let Some(kelvin) = args.kelvin.or(args.mired.map(mired_to_kelvin)) {
        changes.push(DeviceChange::ColorTemperature { kelvin });
    }
    if let Some(level) = args.mist {
        changes.push(DeviceChange::MistLevel { level });
    }
    changes
}

pub async fn handle(args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let changes = changes(&args);
    let mut config = super::bridge_config(global)?;
    if args.no_ble {
        config.connections.ble = false;
    }

    let bridge = Bridge::new(config, Arc::new(FileTokenStore::default_location()));
    let mut events = bridge.events(WATCHED);
    bridge.start().await?;

    let delivery = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        deliver(&bridge, &mut events, &args.device, &changes),
    )
    .await;
    let result = match delivery {
        Ok(Ok(device)) => {
            tokio::time::sleep(FLUSH_GRACE).await;
            Ok(device)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CliError::Unreachable {
            device_id: args.device.clone(),
            secs: args.timeout,
        }),
    };
    bridge.shutdown().await;

    let device = result?;
    let delivered = Delivered {
        device_id: device.device_id.clone(),
        name: device.name.clone(),
        changes,
    };
    let out = output::render_line(global.output, &delivered, |d| {
        format!("Sent {} change(s) to {} [{}]", d.changes.len(), d.name, d.device_id)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Whether the registry has somewhere to send commands for the device.
#[derive(Debug, Default)]
struct Reachability {
    device: Option<Arc<GoveeDevice>>,
    peripheral: bool,
    cloud: bool,
}

impl Reachability {
    fn ready(&self) -> bool {
        self.device.as_ref().is_some_and(|d| {
            (d.ble_address.is_some() && self.peripheral) || (d.iot_topic.is_some() && self.cloud)
        })
    }
}

async fn deliver(
    bridge: &Bridge,
    events: &mut BusReceiver,
    device_id: &str,
    changes: &[DeviceChange],
) -> Result<Arc<GoveeDevice>, CliError> {
    let mut reach = Reachability::default();
    while !reach.ready() {
        let Some(event) = events.recv().await else {
            return Err(CliError::Unreachable {
                device_id: device_id.to_owned(),
                secs: 0,
            });
        };
        match event {
            BusEvent::DeviceDiscovered(device) if device.device_id == device_id => {
                check_supported(&device, changes)?;
                reach.device = Some(device);
            }
            BusEvent::BlePeripheralConnection(c) if c.device_id.as_deref() == Some(device_id) => {
                reach.peripheral = c.state.is_connected();
            }
            BusEvent::IotConnection(state) => reach.cloud = state.is_connected(),
            BusEvent::RestAuthenticationFailure(status) => {
                return Err(CliError::AuthFailed {
                    message: status.message,
                });
            }
            _ => {}
        }
    }

    for change in changes {
        bridge.send(device_id, *change);
    }
    info!(device_id, changes = changes.len(), "changes queued");

    let mut dispatched = 0;
    while dispatched < changes.len() {
        let Some(event) = events.recv().await else { break };
        let frames = match &event {
            BusEvent::BlePeripheralSend(c) if c.device_id == device_id => &c.frames,
            BusEvent::IotDeviceSend(c) if c.device_id == device_id => &c.frames,
            _ => continue,
        };
        // Status queries share the send topics; only command frames count.
        if frames.first().is_some_and(|f| f[0] == COMMAND_IDENTIFIER) {
            dispatched += 1;
            debug!(device_id, dispatched, "change dispatched");
        }
    }

    reach.device.ok_or_else(|| CliError::Unreachable {
        device_id: device_id.to_owned(),
        secs: 0,
    })
}

fn check_supported(device: &GoveeDevice, changes: &[DeviceChange]) -> Result<(), CliError> {
    let supported = device.kind.capabilities();
    match changes.iter().find(|c| !supported.contains(&c.capability())) {
        Some(change) => Err(CliError::Validation {
            field: device.device_id.clone(),
            reason: format!("{} has no {} capability", device.model, change.capability()),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use clap::Parser;
    use goveelink_core::ColorRgb;

    use super::*;
    use crate::cli::{Cli, Command};

    fn set_args(argv: &[&str]) -> SetArgs {
        let mut full = vec!["goveelink", "set", "dev-1"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Set(args) => args,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hsv_input_becomes_rgb_color() {
        let args = set_args(&["--hsv", "120,100,100"]);

        assert_eq!(
            changes(&args),
            vec![DeviceChange::Color {
                color: ColorRgb::new(0, 255, 0)
            }]
        );
    }

    #[test]
    fn mireds_become_kelvin() {
        let args = set_args(&["--mired", "250"]);

        assert_eq!(
            changes(&args),
            vec![DeviceChange::ColorTemperature { kelvin: 4000 }]
        );
    }

    #[test]
    fn power_leads_the_change_list() {
        let args = set_args(&["--brightness", "40", "--color", "#ff8000", "--power", "off"]);

        assert_eq!(
            changes(&args),
            vec![
                DeviceChange::Power { on: false },
                DeviceChange::Brightness { percent: 40 },
                DeviceChange::Color {
                    color: ColorRgb::new(255, 128, 0)
                },
            ]
        );
    }

    #[test]
    fn malformed_colours_are_rejected() {
        for argv in [
            ["--hsv", "400,50,50"],
            ["--hsv", "10,50"],
            ["--color", "ff00"],
            ["--color", "zzzzzz"],
        ] {
            let mut full = vec!["goveelink", "set", "dev-1"];
            full.extend_from_slice(&argv);
            assert!(Cli::try_parse_from(full).is_err(), "{argv:?}");
        }
    }

    #[test]
    fn unsupported_capability_is_a_validation_error() {
        let config = goveelink_core::DeviceConfig {
            device_id: "dev-1".into(),
            model: "H6160".into(),
            ble_address: Some("A4:C1:38:00:00:01".into()),
            ..goveelink_core::DeviceConfig::default()
        };
        let device = goveelink_core::DeviceCatalog::standard()
            .create(&config)
            .unwrap();

        let err = check_supported(&device, &[DeviceChange::MistLevel { level: 2 }]).unwrap_err();

        assert!(err.to_string().contains("mist_level"), "{err}");
        assert!(check_supported(&device, &[DeviceChange::Power { on: true }]).is_ok());
    }
}
