// ── Device transitions ──
//
// Outbound intent: "make this device look like X". Applying a transition
// writes the fragment's desired value, encodes that fragment's change frame,
// and publishes one send event for the resolved route. Confirmed state is
// only ever written by an inbound state update.

use serde::{Deserialize, Serialize};

use crate::bus::{BusEvent, EventBus, IotCommand, PeripheralCommand};
use crate::color::ColorRgb;
use crate::error::CoreError;
use crate::model::{CapabilityKind, GoveeDevice, SegmentChange, SegmentValue};

/// Requested change to a single capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceChange {
    Power { on: bool },
    Brightness { percent: u8 },
    Mode { mode: u8 },
    Color { color: ColorRgb },
    ColorTemperature { kelvin: u32 },
    /// Bit `n` of `mask` selects segment `n`.
    SegmentColor { mask: u16, color: ColorRgb },
    SegmentBrightness { mask: u16, percent: u8 },
    MistLevel { level: u8 },
}

impl DeviceChange {
    pub fn capability(self) -> CapabilityKind {
        match self {
            Self::Power { .. } => CapabilityKind::OnOff,
            Self::Brightness { .. } => CapabilityKind::Brightness,
            Self::Mode { .. } => CapabilityKind::Mode,
            Self::Color { .. } => CapabilityKind::SolidColor,
            Self::ColorTemperature { .. } => CapabilityKind::ColorTemperature,
            Self::SegmentColor { .. } | Self::SegmentBrightness { .. } => CapabilityKind::Segments,
            Self::MistLevel { .. } => CapabilityKind::MistLevel,
        }
    }
}

/// Transport chosen for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ble { address: String },
    Iot { topic: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTransition {
    pub device_id: String,
    pub change: DeviceChange,
}

impl DeviceTransition {
    pub fn new(device_id: impl Into<String>, change: DeviceChange) -> Self {
        Self {
            device_id: device_id.into(),
            change,
        }
    }

    /// Record the desired value on `device` and publish exactly one send
    /// event on `route`.
    ///
    /// Fails without publishing when the device lacks the capability.
    pub fn apply(
        &self,
        device: &mut GoveeDevice,
        route: &Route,
        bus: &EventBus,
    ) -> Result<(), CoreError> {
        let capability = self.change.capability();
        if !self.set_desired(device) {
            return Err(CoreError::Unsupported {
                device_id: device.device_id.clone(),
                capability: capability.into(),
            });
        }

        let frame = device
            .capabilities()
            .iter()
            .find(|c| c.kind() == capability)
            .map(|c| c.fragment().change_frame())
            .transpose()?
            .flatten()
            .ok_or_else(|| CoreError::Unsupported {
                device_id: device.device_id.clone(),
                capability: capability.into(),
            })?;

        let event = match route {
            Route::Ble { address } => BusEvent::BlePeripheralSend(PeripheralCommand {
                address: address.clone(),
                device_id: device.device_id.clone(),
                frames: vec![frame],
            }),
            Route::Iot { topic } => BusEvent::IotDeviceSend(IotCommand {
                device_id: device.device_id.clone(),
                topic: topic.clone(),
                frames: vec![frame],
            }),
        };
        tracing::debug!(
            device_id = %device.device_id,
            capability = %capability,
            ?route,
            "sending device change"
        );
        bus.publish(event);
        Ok(())
    }

    fn set_desired(&self, device: &mut GoveeDevice) -> bool {
        match self.change {
            DeviceChange::Power { on } => device.on_off_mut().map(|s| s.desired = Some(on)),
            DeviceChange::Brightness { percent } => device
                .brightness_mut()
                .map(|s| s.desired = Some(percent.min(100))),
            DeviceChange::Mode { mode } => device.mode_mut().map(|s| s.desired = Some(mode)),
            DeviceChange::Color { color } => {
                device.solid_color_mut().map(|s| s.desired = Some(color))
            }
            DeviceChange::ColorTemperature { kelvin } => device
                .color_temperature_mut()
                .map(|s| s.desired = Some(ColorRgb::from_kelvin(kelvin))),
            DeviceChange::SegmentColor { mask, color } => device.segments_mut().map(|s| {
                s.desired = Some(SegmentChange {
                    mask,
                    value: SegmentValue::Color(color),
                });
            }),
            DeviceChange::SegmentBrightness { mask, percent } => device.segments_mut().map(|s| {
                s.desired = Some(SegmentChange {
                    mask,
                    value: SegmentValue::Brightness(percent.min(100)),
                });
            }),
            DeviceChange::MistLevel { level } => {
                device.mist_level_mut().map(|s| s.desired = Some(level))
            }
        }
        .is_some()
    }
}
