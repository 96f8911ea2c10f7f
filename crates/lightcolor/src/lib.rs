pub mod hsv;
pub mod kelvin;
pub mod xy;

use serde::{Deserialize, Serialize};

pub use hsv::{Hs, Hsb};
pub use xy::XY;

/// 8-bit sRGB triplet, as used by `rgb_color` on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub const fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Build from unit-range channels (0.0 ..= 1.0), rounding and clamping.
    #[must_use]
    pub fn from_unit(r: f64, g: f64, b: f64) -> Self {
        Self {
            r: unit_to_u8(r),
            g: unit_to_u8(g),
            b: unit_to_u8(b),
        }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

/// Wrap a hue angle into `[0, 360)`. Non-finite input maps to 0.
#[must_use]
pub fn wrap_hue(hue: f64) -> f64 {
    if !hue.is_finite() {
        return 0.0;
    }
    let res = hue.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if res >= 360.0 { 0.0 } else { res }
}

/// Clamp a percentage into `[0, 100]`. Non-finite input maps to 0.
#[must_use]
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unit_to_u8(value: f64) -> u8 {
    if value.is_finite() {
        (value * 255.0).round().clamp(0.0, 255.0) as u8
    } else {
        0
    }
}

/// Convert a 0-255 brightness to percent.
#[must_use]
pub fn brightness_to_percent(brightness: u8) -> f64 {
    f64::from(brightness) * 100.0 / 255.0
}

/// Convert a percentage to the 0-255 brightness scale, rounding.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent_to_brightness(percent: f64) -> u8 {
    (clamp_percent(percent) * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8
}
