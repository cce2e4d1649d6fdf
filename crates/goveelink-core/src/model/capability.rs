// ── Capability state fragments ──
//
// Each fragment owns one slice of a device's state, the identifier prefixes
// that address it, and the encoding of its desired value back into a
// command frame. Devices are a list of fragments; nothing here knows which
// device model it belongs to.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::codec::{self, COMMAND_IDENTIFIER, Frame};
use crate::color::ColorRgb;
use crate::error::CodecError;
use crate::model::state::RawDeviceState;

/// Parse/build contract shared by every fragment.
pub trait StateFragment {
    /// Identifier prefixes (after the opcode) this fragment answers to.
    fn status_codes(&self) -> &'static [&'static [u8]];

    /// Update confirmed state from whatever in `state` this fragment owns.
    /// Anything absent leaves the current value untouched.
    fn parse(&mut self, state: &RawDeviceState);

    /// Command frame for the pending desired value, if there is one.
    fn change_frame(&self) -> Result<Option<Frame>, CodecError>;
}

fn command(identifier: &[u8], values: &[u8]) -> Result<Option<Frame>, CodecError> {
    codec::encode(COMMAND_IDENTIFIER, identifier, values).map(Some)
}

/// Store a newly confirmed value and drop the desired value once the device
/// has caught up with it.
fn confirm<T: PartialEq + Copy>(confirmed: &mut Option<T>, desired: &mut Option<T>, value: T) {
    *confirmed = Some(value);
    if desired.as_ref() == Some(&value) {
        *desired = None;
    }
}

// ── Power ────────────────────────────────────────────────────────────

const ON_OFF: &[u8] = &[1];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnOffState {
    pub on: Option<bool>,
    pub desired: Option<bool>,
}

impl StateFragment for OnOffState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[ON_OFF]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let reported = codec::match_frame(ON_OFF, &state.commands)
            .and_then(|v| v.first().map(|b| *b == 1))
            .or(state.on_off);
        if let Some(on) = reported {
            confirm(&mut self.on, &mut self.desired, on);
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(on) => command(ON_OFF, &[u8::from(on)]),
            None => Ok(None),
        }
    }
}

// ── Brightness ───────────────────────────────────────────────────────

const BRIGHTNESS: &[u8] = &[4];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightnessState {
    /// Percent, 0–100.
    pub brightness: Option<u8>,
    pub desired: Option<u8>,
}

impl StateFragment for BrightnessState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[BRIGHTNESS]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let reported = codec::match_frame(BRIGHTNESS, &state.commands)
            .and_then(|v| v.first().copied())
            .or(state.brightness);
        if let Some(level) = reported {
            confirm(&mut self.brightness, &mut self.desired, level.min(100));
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(level) => command(BRIGHTNESS, &[level.min(100)]),
            None => Ok(None),
        }
    }
}

// ── Mode ─────────────────────────────────────────────────────────────

const MODE: &[u8] = &[5];

/// Mode selector. Lights report scene/colour modes here; humidifiers report
/// manual (1), program (2) and auto (3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeState {
    pub mode: Option<u8>,
    pub desired: Option<u8>,
}

impl StateFragment for ModeState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[MODE]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let reported = codec::match_frame(MODE, &state.commands)
            .and_then(|v| v.first().copied())
            .or(state.mode);
        if let Some(mode) = reported {
            confirm(&mut self.mode, &mut self.desired, mode);
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(mode) => command(MODE, &[mode]),
            None => Ok(None),
        }
    }
}

// ── Solid colour ─────────────────────────────────────────────────────

const SOLID_COLOR: &[u8] = &[5, 13];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolidColorState {
    pub color: Option<ColorRgb>,
    pub desired: Option<ColorRgb>,
}

impl StateFragment for SolidColorState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[SOLID_COLOR]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let reported = codec::match_frame(SOLID_COLOR, &state.commands)
            .and_then(ColorRgb::from_bytes)
            .or(state.color);
        if let Some(color) = reported {
            confirm(&mut self.color, &mut self.desired, color);
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(color) => command(SOLID_COLOR, &color.to_bytes()),
            None => Ok(None),
        }
    }
}

// ── Colour temperature ───────────────────────────────────────────────

const COLOR_TEMPERATURE: &[u8] = &[5, 2, 255, 255, 255, 1];

/// White point, carried on the wire as the RGB equivalent of a kelvin value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTemperatureState {
    pub color: Option<ColorRgb>,
    pub desired: Option<ColorRgb>,
}

impl ColorTemperatureState {
    pub fn kelvin(&self) -> Option<u32> {
        self.color.map(ColorRgb::to_kelvin)
    }
}

impl StateFragment for ColorTemperatureState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[COLOR_TEMPERATURE]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let reported = codec::match_frame(COLOR_TEMPERATURE, &state.commands)
            .and_then(ColorRgb::from_bytes)
            .or_else(|| state.color_temperature.map(ColorRgb::from_kelvin));
        if let Some(color) = reported {
            confirm(&mut self.color, &mut self.desired, color);
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(color) => command(COLOR_TEMPERATURE, &color.to_bytes()),
            None => Ok(None),
        }
    }
}

// ── Segments ─────────────────────────────────────────────────────────

/// Number of addressable segments on RGBIC strips.
pub const SEGMENT_COUNT: usize = 15;

const SEGMENTS_PER_REPORT: usize = 4;
const SEGMENT_REPORTS: &[&[u8]] = &[&[165, 1], &[165, 2], &[165, 3], &[165, 4]];
const SEGMENT_COLOR: &[u8] = &[5, 21, 1];
const SEGMENT_BRIGHTNESS: &[u8] = &[5, 21, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSegment {
    pub brightness: u8,
    pub color: ColorRgb,
}

/// Pending per-segment change; bit `n` of `mask` selects segment `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentChange {
    pub mask: u16,
    pub value: SegmentValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentValue {
    Color(ColorRgb),
    Brightness(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentsState {
    pub segments: Vec<Option<ColorSegment>>,
    pub desired: Option<SegmentChange>,
}

impl Default for SegmentsState {
    fn default() -> Self {
        Self {
            segments: vec![None; SEGMENT_COUNT],
            desired: None,
        }
    }
}

impl StateFragment for SegmentsState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        SEGMENT_REPORTS
    }

    fn parse(&mut self, state: &RawDeviceState) {
        for (report, code) in SEGMENT_REPORTS.iter().enumerate() {
            let Some(values) = codec::match_frame(code, &state.commands) else {
                continue;
            };
            for (offset, chunk) in values
                .chunks_exact(4)
                .take(SEGMENTS_PER_REPORT)
                .enumerate()
            {
                let index = report * SEGMENTS_PER_REPORT + offset;
                let (Some(slot), Some(color)) =
                    (self.segments.get_mut(index), ColorRgb::from_bytes(&chunk[1..]))
                else {
                    break;
                };
                *slot = Some(ColorSegment {
                    brightness: chunk[0],
                    color,
                });
            }
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        let Some(change) = self.desired else {
            return Ok(None);
        };
        let [lo, hi] = change.mask.to_le_bytes();
        match change.value {
            SegmentValue::Color(color) => command(
                SEGMENT_COLOR,
                &[color.red, color.green, color.blue, 0, 0, 0, 0, 0, lo, hi],
            ),
            SegmentValue::Brightness(level) => command(SEGMENT_BRIGHTNESS, &[level.min(100), lo, hi]),
        }
    }
}

// ── Mist level ───────────────────────────────────────────────────────

const MIST_LEVEL: &[u8] = &[5, 1];

/// Humidifier output level, 1–9 in manual mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistLevelState {
    pub level: Option<u8>,
    pub desired: Option<u8>,
}

impl StateFragment for MistLevelState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[MIST_LEVEL]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        if let Some(level) = codec::match_frame(MIST_LEVEL, &state.commands).and_then(|v| v.first().copied()) {
            confirm(&mut self.level, &mut self.desired, level);
        }
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        match self.desired {
            Some(level) => command(MIST_LEVEL, &[level]),
            None => Ok(None),
        }
    }
}

// ── Mist programs ────────────────────────────────────────────────────

const MIST_PROGRAM: &[u8] = &[5, 2];

/// Number of program slots a humidifier reports.
pub const MIST_PROGRAM_COUNT: usize = 3;

const MIST_PROGRAM_STRIDE: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistProgram {
    pub level: u8,
    /// Minutes.
    pub duration: u16,
    /// Minutes left in the current run.
    pub remaining: u16,
}

/// Scheduled programs. Read-only: the device owns the schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistProgramState {
    pub active_program: Option<u8>,
    pub programs: Vec<MistProgram>,
}

impl MistProgramState {
    pub fn active(&self) -> Option<&MistProgram> {
        self.programs.get(usize::from(self.active_program?))
    }
}

impl StateFragment for MistProgramState {
    fn status_codes(&self) -> &'static [&'static [u8]] {
        &[MIST_PROGRAM]
    }

    fn parse(&mut self, state: &RawDeviceState) {
        let Some(values) = codec::match_frame(MIST_PROGRAM, &state.commands) else {
            return;
        };
        if values.len() < 1 + MIST_PROGRAM_COUNT * MIST_PROGRAM_STRIDE {
            tracing::warn!(
                device_id = %state.device_id,
                len = values.len(),
                "mist program report too short, ignoring"
            );
            return;
        }

        self.active_program = Some(values[0] / 16);
        self.programs = values[1..]
            .chunks_exact(MIST_PROGRAM_STRIDE)
            .take(MIST_PROGRAM_COUNT)
            .map(|p| MistProgram {
                level: p[0],
                duration: codec::decode_u16_quirk(p[1], p[2]),
                remaining: codec::decode_u16_quirk(p[3], p[4]),
            })
            .collect();
    }

    fn change_frame(&self) -> Result<Option<Frame>, CodecError> {
        Ok(None)
    }
}

// ── Capability ───────────────────────────────────────────────────────

/// Which fragment a device type declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CapabilityKind {
    OnOff,
    Brightness,
    Mode,
    SolidColor,
    ColorTemperature,
    Segments,
    MistLevel,
    MistProgram,
}

/// A fragment instance held by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum Capability {
    OnOff(OnOffState),
    Brightness(BrightnessState),
    Mode(ModeState),
    SolidColor(SolidColorState),
    ColorTemperature(ColorTemperatureState),
    Segments(SegmentsState),
    MistLevel(MistLevelState),
    MistProgram(MistProgramState),
}

impl Capability {
    /// Fresh fragment with nothing confirmed yet.
    pub fn new(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::OnOff => Self::OnOff(OnOffState::default()),
            CapabilityKind::Brightness => Self::Brightness(BrightnessState::default()),
            CapabilityKind::Mode => Self::Mode(ModeState::default()),
            CapabilityKind::SolidColor => Self::SolidColor(SolidColorState::default()),
            CapabilityKind::ColorTemperature => {
                Self::ColorTemperature(ColorTemperatureState::default())
            }
            CapabilityKind::Segments => Self::Segments(SegmentsState::default()),
            CapabilityKind::MistLevel => Self::MistLevel(MistLevelState::default()),
            CapabilityKind::MistProgram => Self::MistProgram(MistProgramState::default()),
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::OnOff(_) => CapabilityKind::OnOff,
            Self::Brightness(_) => CapabilityKind::Brightness,
            Self::Mode(_) => CapabilityKind::Mode,
            Self::SolidColor(_) => CapabilityKind::SolidColor,
            Self::ColorTemperature(_) => CapabilityKind::ColorTemperature,
            Self::Segments(_) => CapabilityKind::Segments,
            Self::MistLevel(_) => CapabilityKind::MistLevel,
            Self::MistProgram(_) => CapabilityKind::MistProgram,
        }
    }

    pub fn fragment(&self) -> &dyn StateFragment {
        match self {
            Self::OnOff(s) => s,
            Self::Brightness(s) => s,
            Self::Mode(s) => s,
            Self::SolidColor(s) => s,
            Self::ColorTemperature(s) => s,
            Self::Segments(s) => s,
            Self::MistLevel(s) => s,
            Self::MistProgram(s) => s,
        }
    }

    pub fn fragment_mut(&mut self) -> &mut dyn StateFragment {
        match self {
            Self::OnOff(s) => s,
            Self::Brightness(s) => s,
            Self::Mode(s) => s,
            Self::SolidColor(s) => s,
            Self::ColorTemperature(s) => s,
            Self::Segments(s) => s,
            Self::MistLevel(s) => s,
            Self::MistProgram(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::codec::REPORT_IDENTIFIER;
    use pretty_assertions::assert_eq;

    fn report(body: &[u8]) -> Vec<u8> {
        codec::encode(REPORT_IDENTIFIER, body, &[]).unwrap().to_vec()
    }

    fn state(frames: Vec<Vec<u8>>) -> RawDeviceState {
        RawDeviceState::with_frames("dev-1", frames)
    }

    #[test]
    fn color_temperature_reads_rgb_after_prefix() {
        let mut ct = ColorTemperatureState::default();
        ct.parse(&state(vec![vec![0xAA, 5, 2, 255, 255, 255, 1, 50, 51, 52]]));
        assert_eq!(ct.color, Some(ColorRgb::new(50, 51, 52)));
    }

    #[test]
    fn color_temperature_change_frame_matches_fixture() {
        let ct = ColorTemperatureState {
            color: None,
            desired: Some(ColorRgb::new(20, 80, 40)),
        };
        let frame = ct.change_frame().unwrap().unwrap();
        assert_eq!(&frame[..10], &[0x33, 5, 2, 255, 255, 255, 1, 20, 80, 40]);
        assert_eq!(frame[19], 166);
    }

    #[test]
    fn unrelated_frames_leave_state_untouched() {
        let mut on_off = OnOffState {
            on: Some(true),
            desired: None,
        };
        let mut brightness = BrightnessState {
            brightness: Some(42),
            desired: None,
        };
        let unrelated = state(vec![report(&[165, 1, 100, 1, 2, 3]), report(&[9, 9])]);

        on_off.parse(&unrelated);
        brightness.parse(&unrelated);

        assert_eq!(on_off.on, Some(true));
        assert_eq!(brightness.brightness, Some(42));
    }

    #[test]
    fn confirmed_value_clears_matching_desire() {
        let mut on_off = OnOffState {
            on: Some(false),
            desired: Some(true),
        };
        on_off.parse(&state(vec![report(&[1, 1])]));
        assert_eq!(on_off.on, Some(true));
        assert_eq!(on_off.desired, None);
    }

    #[test]
    fn differing_confirmation_keeps_desire() {
        let mut brightness = BrightnessState {
            brightness: None,
            desired: Some(80),
        };
        brightness.parse(&state(vec![report(&[4, 20])]));
        assert_eq!(brightness.brightness, Some(20));
        assert_eq!(brightness.desired, Some(80));
    }

    #[test]
    fn scalar_fields_are_consumed() {
        let mut on_off = OnOffState::default();
        let mut ct = ColorTemperatureState::default();
        let mut raw = RawDeviceState::new("dev-1");
        raw.on_off = Some(true);
        raw.color_temperature = Some(4000);

        on_off.parse(&raw);
        ct.parse(&raw);

        assert_eq!(on_off.on, Some(true));
        assert_eq!(ct.color, Some(ColorRgb::from_kelvin(4000)));
        assert!(ct.kelvin().unwrap().abs_diff(4000) <= 100);
    }

    #[test]
    fn segments_decode_four_per_report() {
        let mut segments = SegmentsState::default();
        let frame = report(&[
            165, 2, //
            10, 255, 0, 0, //
            20, 0, 255, 0, //
            30, 0, 0, 255, //
            40, 1, 2, 3,
        ]);
        segments.parse(&state(vec![frame]));

        assert!(segments.segments[..4].iter().all(Option::is_none));
        assert_eq!(
            segments.segments[4],
            Some(ColorSegment {
                brightness: 10,
                color: ColorRgb::new(255, 0, 0)
            })
        );
        assert_eq!(
            segments.segments[7],
            Some(ColorSegment {
                brightness: 40,
                color: ColorRgb::new(1, 2, 3)
            })
        );
    }

    #[test]
    fn last_segment_report_stops_at_segment_count() {
        let mut segments = SegmentsState::default();
        let frame = report(&[165, 4, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]);
        segments.parse(&state(vec![frame]));

        assert_eq!(segments.segments.len(), SEGMENT_COUNT);
        assert_eq!(segments.segments[14].unwrap().brightness, 3);
    }

    #[test]
    fn segment_color_change_carries_mask() {
        let segments = SegmentsState {
            desired: Some(SegmentChange {
                mask: 0b0000_0001_0000_0011,
                value: SegmentValue::Color(ColorRgb::new(9, 8, 7)),
            }),
            ..SegmentsState::default()
        };
        let frame = segments.change_frame().unwrap().unwrap();
        assert_eq!(
            &frame[..14],
            &[0x33, 5, 21, 1, 9, 8, 7, 0, 0, 0, 0, 0, 0b0000_0011, 0b0000_0001]
        );
    }

    #[test]
    fn mist_programs_decode_with_255_multiplier() {
        let mut programs = MistProgramState::default();
        programs.parse(&state(vec![vec![
            0xAA, 5, 2, //
            0x10, // program 1
            3, 0, 60, 0, 30, //
            7, 1, 0, 0, 255, //
            9, 2, 10, 0, 0,
        ]]));

        assert_eq!(programs.active_program, Some(1));
        assert_eq!(programs.programs.len(), 3);
        assert_eq!(
            programs.programs[1],
            MistProgram {
                level: 7,
                duration: 255,
                remaining: 255
            }
        );
        assert_eq!(programs.programs[2].duration, 520);
        assert_eq!(programs.active().unwrap().level, 7);
    }

    #[test]
    fn short_mist_program_report_is_ignored() {
        let mut programs = MistProgramState::default();
        programs.parse(&state(vec![vec![0xAA, 5, 2, 0x10, 3]]));
        assert_eq!(programs, MistProgramState::default());
    }

    #[test]
    fn capability_dispatch_round_trips_kind() {
        use strum::IntoEnumIterator;
        for kind in CapabilityKind::iter() {
            let capability = Capability::new(kind);
            assert_eq!(capability.kind(), kind);
            assert!(!capability.fragment().status_codes().is_empty());
        }
    }
}
