// ── Colour conversions ──
//
// RGB is the wire representation. Hosts usually speak hue/saturation and
// mireds/kelvin, so the conversions live here. All of them quantize to u8
// channels; round trips are stable within a few units.

use serde::{Deserialize, Serialize};

/// Lowest colour temperature the kelvin conversions accept.
pub const MIN_KELVIN: u32 = 1000;
/// Highest colour temperature the kelvin conversions accept.
pub const MAX_KELVIN: u32 = 40_000;

/// An sRGB colour, one byte per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorRgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorRgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Build from the first three bytes of a frame remainder.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [red, green, blue, ..] => Some(Self::new(*red, *green, *blue)),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }

    /// Hue in degrees `[0, 360)`, saturation and value in percent.
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = (saturation / 100.0).clamp(0.0, 1.0);
        let v = (value / 100.0).clamp(0.0, 1.0);

        let c = v * s;
        let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
        let m = v - c;

        let (r, g, b) = match h {
            h if h < 1.0 => (c, x, 0.0),
            h if h < 2.0 => (x, c, 0.0),
            h if h < 3.0 => (0.0, c, x),
            h if h < 4.0 => (0.0, x, c),
            h if h < 5.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        Self::new(channel((r + m) * 255.0), channel((g + m) * 255.0), channel((b + m) * 255.0))
    }

    /// Inverse of [`from_hsv`](Self::from_hsv): `(hue°, saturation%, value%)`.
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.red) / 255.0;
        let g = f64::from(self.green) / 255.0;
        let b = f64::from(self.blue) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let hue = if delta == 0.0 {
            0.0
        } else if (max - r).abs() < f64::EPSILON {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if (max - g).abs() < f64::EPSILON {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max * 100.0 };

        (hue, saturation, max * 100.0)
    }

    /// Approximate black-body colour for a temperature in kelvin.
    pub fn from_kelvin(kelvin: u32) -> Self {
        let (r, g, b) = kelvin_curve(f64::from(kelvin.clamp(MIN_KELVIN, MAX_KELVIN)));
        Self::new(channel(r), channel(g), channel(b))
    }

    /// Closest kelvin on the black-body curve, by blue/red ratio.
    pub fn to_kelvin(self) -> u32 {
        let target = f64::from(self.blue) / f64::from(self.red.max(1));
        let mut low = f64::from(MIN_KELVIN);
        let mut high = f64::from(MAX_KELVIN);

        while high - low > 0.4 {
            let mid = (high + low) / 2.0;
            let (r, _, b) = kelvin_curve(mid);
            if b / r.max(1.0) >= target {
                high = mid;
            } else {
                low = mid;
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let kelvin = ((high + low) / 2.0).round() as u32;
        kelvin
    }
}

/// Unquantized Tanner Helland fit, channels clamped to `[0, 255]`.
fn kelvin_curve(kelvin: f64) -> (f64, f64, f64) {
    let temp = kelvin / 100.0;

    let red = if temp <= 66.0 {
        255.0
    } else {
        329.698_727_446 * (temp - 60.0).powf(-0.133_204_759_2)
    };
    let green = if temp <= 66.0 {
        99.470_802_586_1 * temp.ln() - 161.119_568_166_1
    } else {
        288.122_169_528_3 * (temp - 60.0).powf(-0.075_514_849_2)
    };
    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.517_731_223_1 * (temp - 10.0).ln() - 305.044_792_730_7
    };

    (red.clamp(0.0, 255.0), green.clamp(0.0, 255.0), blue.clamp(0.0, 255.0))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Convert mireds (host colour-temperature unit) to kelvin.
pub fn mired_to_kelvin(mired: u32) -> u32 {
    1_000_000 / mired.max(1)
}
