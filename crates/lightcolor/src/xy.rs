use serde::{Deserialize, Serialize};

use crate::Rgb;

/// CIE 1931 chromaticity coordinate.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct XY {
    pub x: f64,
    pub y: f64,
}

impl XY {
    /// D65 white point
    pub const D65: Self = Self {
        x: 0.3127,
        y: 0.3290,
    };

    const EDGE: f64 = 0.0001;

    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Keep both coordinates strictly inside (0, 1) so `1 / y` stays finite.
    #[must_use]
    pub fn clamped(self) -> Self {
        let fix = |v: f64| {
            if v.is_finite() {
                v.clamp(Self::EDGE, 1.0 - Self::EDGE)
            } else {
                0.5
            }
        };
        Self {
            x: fix(self.x),
            y: fix(self.y),
        }
    }

    /// xyY to sRGB (D65), with `brightness` on the 0-255 scale used for Y.
    #[must_use]
    pub fn to_rgb(self, brightness: u8) -> Rgb {
        let Self { x, y } = self.clamped();
        let z = 1.0 - x - y;

        let lum = f64::from(brightness) / 255.0;
        let big_x = lum / y * x;
        let big_z = lum / y * z;

        let r = big_x * 3.2406 - lum * 1.5372 - big_z * 0.4986;
        let g = -big_x * 0.9689 + lum * 1.8758 + big_z * 0.0415;
        let b = big_x * 0.0557 - lum * 0.2040 + big_z * 1.0570;

        let mut r = gamma_encode(r);
        let mut g = gamma_encode(g);
        let mut b = gamma_encode(b);

        let max = r.max(g).max(b);
        if max > 1.0 {
            r /= max;
            g /= max;
            b /= max;
        }

        Rgb::from_unit(r, g, b)
    }
}

impl Default for XY {
    fn default() -> Self {
        Self::D65
    }
}

fn gamma_encode(linear: f64) -> f64 {
    let value = if linear <= 0.003_130_8 {
        12.92 * linear
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    };
    value.max(0.0)
}
