//! `goveelink run`: the bridge daemon.
//!
//! Starts every enabled transport and prints one line per device or
//! connection change until Ctrl-C (or `--duration`).

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use goveelink_config::FileTokenStore;
use goveelink_core::transport::ApiStatus;
use goveelink_core::{Bridge, BusEvent, ConnectionState, GoveeDevice, Topic};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output;

const WATCHED: &[Topic] = &[
    Topic::DeviceDiscovered,
    Topic::DeviceUpdated,
    Topic::IotConnection,
    Topic::BleConnection,
    Topic::BlePeripheralConnection,
    Topic::RestAuthenticationFailure,
    Topic::RestResponseFailure,
];

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Report<'a> {
    Discovered { device: &'a GoveeDevice },
    Updated { device: &'a GoveeDevice },
    Transport { transport: &'static str, state: ConnectionState },
    Peripheral { address: &'a str, state: ConnectionState },
    AuthenticationFailed { status: &'a ApiStatus },
    RequestFailed { status: &'a ApiStatus },
}

impl Report<'_> {
    fn line(&self) -> String {
        match self {
            Self::Discovered { device } => format!("+ {}", summary(device)),
            Self::Updated { device } => format!("~ {}", summary(device)),
            Self::Transport { transport, state } => format!("{transport}: {state}"),
            Self::Peripheral { address, state } => format!("ble {address}: {state}"),
            Self::AuthenticationFailed { status } => {
                format!("authentication failed ({}): {}", status.status, status.message)
            }
            Self::RequestFailed { status } => {
                format!("device list failed ({}): {}", status.status, status.message)
            }
        }
    }
}

fn summary(device: &GoveeDevice) -> String {
    let mut line = format!("{} [{} {}]", device.name, device.model, device.device_id);
    if let Some(on) = device.on_off().and_then(|s| s.on) {
        let _ = write!(line, " power={}", if on { "on" } else { "off" });
    }
    if let Some(percent) = device.brightness().and_then(|s| s.brightness) {
        let _ = write!(line, " brightness={percent}%");
    }
    if let Some(c) = device.solid_color().and_then(|s| s.color) {
        let (hue, saturation, value) = c.to_hsv();
        let _ = write!(
            line,
            " color=#{:02x}{:02x}{:02x} hsv={hue:.0},{saturation:.0},{value:.0}",
            c.red, c.green, c.blue
        );
    }
    if let Some(kelvin) = device.color_temperature().and_then(|s| s.kelvin()) {
        let _ = write!(line, " kelvin={kelvin}");
    }
    if let Some(level) = device.mist_level().and_then(|s| s.level) {
        let _ = write!(line, " mist={level}");
    }
    if device.connected == Some(false) {
        line.push_str(" (offline)");
    }
    line
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut config = super::bridge_config(global)?;
    if args.no_ble {
        config.connections.ble = false;
    }
    if args.no_iot {
        config.connections.iot = false;
    }

    let bridge = Bridge::new(config, Arc::new(FileTokenStore::default_location()));
    let mut events = bridge.events(WATCHED);
    bridge.start().await?;
    info!("bridge running");

    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    let result = loop {
        tokio::select! {
            () = &mut stop => break Ok(()),
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                if let Err(e) = report(global, &event) {
                    break Err(e);
                }
            }
        }
    };

    info!("shutting down");
    bridge.shutdown().await;
    result
}

fn report(global: &GlobalOpts, event: &BusEvent) -> Result<(), CliError> {
    let report = match event {
        BusEvent::DeviceDiscovered(device) => Report::Discovered {
            device: device.as_ref(),
        },
        BusEvent::DeviceUpdated(device) => Report::Updated {
            device: device.as_ref(),
        },
        BusEvent::IotConnection(state) => Report::Transport {
            transport: "cloud",
            state: *state,
        },
        BusEvent::BleConnection(state) => Report::Transport {
            transport: "ble",
            state: *state,
        },
        BusEvent::BlePeripheralConnection(connection) => Report::Peripheral {
            address: &connection.address,
            state: connection.state,
        },
        BusEvent::RestAuthenticationFailure(status) => Report::AuthenticationFailed { status },
        BusEvent::RestResponseFailure(status) => Report::RequestFailed { status },
        _ => return Ok(()),
    };
    let format = match global.output {
        OutputFormat::Json => OutputFormat::JsonCompact,
        other => other,
    };
    let out = output::render_line(format, &report, |r| r.line())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use goveelink_core::{ColorRgb, DeviceCatalog, DeviceConfig, RawDeviceState};

    use super::*;

    #[test]
    fn summary_shows_color_as_hex_and_hsv() {
        let config = DeviceConfig {
            device_id: "dev-1".into(),
            model: "H6003".into(),
            name: "Desk".into(),
            ..DeviceConfig::default()
        };
        let mut device = DeviceCatalog::standard().create(&config).unwrap();
        let mut state = RawDeviceState::new("dev-1");
        state.on_off = Some(true);
        device.parse(&state);
        device.solid_color_mut().unwrap().color = Some(ColorRgb::new(0, 255, 0));

        assert_eq!(
            summary(&device),
            "Desk [H6003 dev-1] power=on color=#00ff00 hsv=120,100,100"
        );
    }
}
