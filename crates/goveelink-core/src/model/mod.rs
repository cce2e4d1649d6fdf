// ── Device model ──
//
// A `GoveeDevice` is identity plus an ordered list of capability fragments
// fixed by its `DeviceKind`. Cross-fragment rules (program level feeding the
// mist level) are listed per kind as `Derivation`s and run after every
// fragment has parsed the same update.

pub mod capability;
pub mod catalog;
pub mod state;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use capability::{
    Capability, CapabilityKind, ColorSegment, MistProgram, SegmentChange, SegmentValue,
    StateFragment, SEGMENT_COUNT,
};
pub use catalog::DeviceCatalog;
pub use state::{DeviceConfig, DeviceTarget, RawDeviceState};

use capability::{
    BrightnessState, ColorTemperatureState, MistLevelState, MistProgramState, ModeState,
    OnOffState, SegmentsState, SolidColorState,
};

/// Humidifier mode that runs the scheduled programs.
pub const PROGRAM_MODE: u8 = 2;

// ── DeviceKind ───────────────────────────────────────────────────────

/// Device families, each with a fixed capability list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Tunable-white bulbs: power, brightness, colour temperature.
    WhiteLight,
    /// Single-zone colour lights.
    RgbLight,
    /// Addressable strips: everything an RGB light has, plus segments.
    RgbicLight,
    /// Humidifiers. `Mode` and `MistProgram` must both be parsed before
    /// `ProgramMistLevel` runs.
    Humidifier,
    /// Air purifiers: power and fan mode.
    Purifier,
}

/// Rule that derives one fragment's value from others after a full parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Derivation {
    /// In program mode, the active program's level is the mist level.
    ProgramMistLevel,
}

impl DeviceKind {
    pub fn capabilities(self) -> &'static [CapabilityKind] {
        use CapabilityKind as C;
        match self {
            Self::WhiteLight => &[C::OnOff, C::Brightness, C::ColorTemperature],
            Self::RgbLight => &[
                C::OnOff,
                C::Brightness,
                C::Mode,
                C::SolidColor,
                C::ColorTemperature,
            ],
            Self::RgbicLight => &[
                C::OnOff,
                C::Brightness,
                C::Mode,
                C::SolidColor,
                C::ColorTemperature,
                C::Segments,
            ],
            Self::Humidifier => &[C::OnOff, C::Mode, C::MistLevel, C::MistProgram],
            Self::Purifier => &[C::OnOff, C::Mode],
        }
    }

    /// Derivations in the order they must run.
    pub fn derivations(self) -> &'static [Derivation] {
        match self {
            Self::Humidifier => &[Derivation::ProgramMistLevel],
            _ => &[],
        }
    }
}

// ── GoveeDevice ──────────────────────────────────────────────────────

/// One physical device and its composed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoveeDevice {
    pub device_id: String,
    pub model: String,
    pub name: String,
    pub kind: DeviceKind,
    pub ble_address: Option<String>,
    pub iot_topic: Option<String>,
    /// Cloud-reported reachability.
    pub connected: Option<bool>,
    capabilities: Vec<Capability>,
    status_codes: Vec<Vec<u8>>,
}

macro_rules! fragment_accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self) -> Option<&$ty> {
                self.capabilities.iter().find_map(|c| match c {
                    Capability::$variant(s) => Some(s),
                    _ => None,
                })
            }

            pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                self.capabilities.iter_mut().find_map(|c| match c {
                    Capability::$variant(s) => Some(s),
                    _ => None,
                })
            }
        )*
    };
}

impl GoveeDevice {
    pub fn new(config: &DeviceConfig, kind: DeviceKind) -> Self {
        let capabilities: Vec<Capability> = kind
            .capabilities()
            .iter()
            .map(|k| Capability::new(*k))
            .collect();

        let mut status_codes: Vec<Vec<u8>> = Vec::new();
        for code in capabilities
            .iter()
            .flat_map(|c| c.fragment().status_codes().iter())
        {
            if !status_codes.iter().any(|c| c == code) {
                status_codes.push(code.to_vec());
            }
        }

        Self {
            device_id: config.device_id.clone(),
            model: config.model.clone(),
            name: if config.name.is_empty() {
                config.model.clone()
            } else {
                config.name.clone()
            },
            kind,
            ble_address: config.ble_address.clone().filter(|a| !a.is_empty()),
            iot_topic: config.iot_topic.clone().filter(|t| !t.is_empty()),
            connected: None,
            capabilities,
            status_codes,
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Every identifier prefix the device's fragments recognise.
    pub fn status_codes(&self) -> &[Vec<u8>] {
        &self.status_codes
    }

    pub fn has_transport(&self) -> bool {
        self.ble_address.is_some() || self.iot_topic.is_some()
    }

    /// Apply a state update: every fragment parses, then the kind's
    /// derivations run in their declared order.
    pub fn parse(&mut self, state: &RawDeviceState) {
        for capability in &mut self.capabilities {
            capability.fragment_mut().parse(state);
        }
        for derivation in self.kind.derivations() {
            self.derive(*derivation);
        }
        if let Some(connected) = state.connected {
            self.connected = Some(connected);
        }
    }

    fn derive(&mut self, derivation: Derivation) {
        match derivation {
            Derivation::ProgramMistLevel => {
                let in_program_mode = self.mode().and_then(|m| m.mode) == Some(PROGRAM_MODE);
                let level = self
                    .mist_program()
                    .and_then(MistProgramState::active)
                    .map(|p| p.level);
                if let (true, Some(level), Some(mist)) = (in_program_mode, level, self.mist_level_mut()) {
                    mist.level = Some(level);
                }
            }
        }
    }

    /// What a transport needs to query this device.
    pub fn target(&self) -> DeviceTarget {
        DeviceTarget {
            device_id: self.device_id.clone(),
            model: self.model.clone(),
            ble_address: self.ble_address.clone(),
            iot_topic: self.iot_topic.clone(),
            status_codes: self.status_codes.clone(),
        }
    }

    fragment_accessors! {
        on_off, on_off_mut => OnOff(OnOffState);
        brightness, brightness_mut => Brightness(BrightnessState);
        mode, mode_mut => Mode(ModeState);
        solid_color, solid_color_mut => SolidColor(SolidColorState);
        color_temperature, color_temperature_mut => ColorTemperature(ColorTemperatureState);
        segments, segments_mut => Segments(SegmentsState);
        mist_level, mist_level_mut => MistLevel(MistLevelState);
        mist_program, mist_program_mut => MistProgram(MistProgramState);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::codec::{self, REPORT_IDENTIFIER};
    use crate::color::ColorRgb;
    use pretty_assertions::assert_eq;

    fn config(model: &str) -> DeviceConfig {
        DeviceConfig {
            device_id: "AA:BB:CC:DD:EE:FF:00:01".into(),
            model: model.into(),
            name: "Test".into(),
            ble_address: Some("A4:C1:38:00:00:01".into()),
            ..DeviceConfig::default()
        }
    }

    fn report(body: &[u8]) -> Vec<u8> {
        codec::encode(REPORT_IDENTIFIER, body, &[]).unwrap().to_vec()
    }

    #[test]
    fn status_codes_are_combined_without_duplicates() {
        let device = GoveeDevice::new(&config("H6160"), DeviceKind::RgbicLight);
        let codes = device.status_codes();

        assert!(codes.contains(&vec![1]));
        assert!(codes.contains(&vec![4]));
        assert!(codes.contains(&vec![5, 2, 255, 255, 255, 1]));
        assert!(codes.contains(&vec![165, 4]));
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn unrelated_frames_change_nothing() {
        let mut device = GoveeDevice::new(&config("H6003"), DeviceKind::RgbLight);
        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![report(&[1, 1]), report(&[4, 55]), report(&[5, 13, 10, 20, 30])],
        ));
        let before = device.clone();

        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![report(&[0x99, 1, 2]), report(&[165, 1, 1, 2, 3, 4])],
        ));

        assert_eq!(device, before);
        assert_eq!(device.on_off().unwrap().on, Some(true));
        assert_eq!(device.brightness().unwrap().brightness, Some(55));
        assert_eq!(device.solid_color().unwrap().color, Some(ColorRgb::new(10, 20, 30)));
    }

    #[test]
    fn humidifier_program_level_feeds_mist_level() {
        let mut device = GoveeDevice::new(&config("H7141"), DeviceKind::Humidifier);
        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![vec![
                0xAA, 5, 2, //
                0x20, // program 2
                3, 0, 60, 0, 30, //
                5, 0, 60, 0, 30, //
                8, 0, 60, 0, 30,
            ]],
        ));

        assert_eq!(device.mode().unwrap().mode, Some(PROGRAM_MODE));
        assert_eq!(device.mist_program().unwrap().active_program, Some(2));
        assert_eq!(device.mist_level().unwrap().level, Some(8));
    }

    #[test]
    fn humidifier_ignores_unrelated_frames() {
        let mut device = GoveeDevice::new(&config("H7141"), DeviceKind::Humidifier);
        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![vec![
                0xAA, 5, 2, //
                0x10, // program 1
                3, 0, 60, 0, 30, //
                6, 0, 60, 0, 30, //
                9, 0, 60, 0, 30,
            ]],
        ));
        let before = device.clone();

        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![report(&[0x99, 1, 2]), report(&[4, 80]), report(&[165, 1, 1, 2, 3, 4])],
        ));

        assert_eq!(device, before);
        assert_eq!(device.mode().unwrap().mode, Some(PROGRAM_MODE));
        assert_eq!(device.mist_program().unwrap().active_program, Some(1));
        assert_eq!(device.mist_level().unwrap().level, Some(6));
    }

    #[test]
    fn manual_mode_keeps_reported_mist_level() {
        let mut device = GoveeDevice::new(&config("H7141"), DeviceKind::Humidifier);
        device.parse(&RawDeviceState::with_frames(
            device.device_id.clone(),
            vec![report(&[5, 1, 4])],
        ));

        assert_eq!(device.mode().unwrap().mode, Some(1));
        assert_eq!(device.mist_level().unwrap().level, Some(4));
    }

    #[test]
    fn empty_addresses_mean_no_transport() {
        let mut cfg = config("H6003");
        cfg.ble_address = Some(String::new());
        cfg.iot_topic = None;
        let device = GoveeDevice::new(&cfg, DeviceKind::RgbLight);
        assert!(!device.has_transport());
    }

    #[test]
    fn connected_flag_follows_state() {
        let mut device = GoveeDevice::new(&config("H7121"), DeviceKind::Purifier);
        let mut state = RawDeviceState::new(device.device_id.clone());
        state.connected = Some(false);
        device.parse(&state);
        assert_eq!(device.connected, Some(false));
    }
}
