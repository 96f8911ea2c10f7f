use serde::{Deserialize, Serialize};

use crate::{Rgb, clamp_percent, wrap_hue};

/// Hue in degrees `[0, 360)`, saturation in percent `[0, 100]`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hs {
    pub hue: f64,
    pub saturation: f64,
}

impl Hs {
    #[must_use]
    pub fn new(hue: f64, saturation: f64) -> Self {
        Self {
            hue: wrap_hue(hue),
            saturation: clamp_percent(saturation),
        }
    }
}

/// Hue/saturation plus brightness in percent `[0, 100]`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hsb {
    pub hue: f64,
    pub saturation: f64,
    pub brightness: f64,
}

impl Hsb {
    #[must_use]
    pub fn new(hue: f64, saturation: f64, brightness: f64) -> Self {
        Self {
            hue: wrap_hue(hue),
            saturation: clamp_percent(saturation),
            brightness: clamp_percent(brightness),
        }
    }

    #[must_use]
    pub fn to_rgb(self) -> Rgb {
        hsb_to_rgb(self.hue, self.saturation, self.brightness)
    }
}

/// Standard six-sector HSV to RGB.
#[must_use]
pub fn hsb_to_rgb(hue: f64, saturation: f64, brightness: f64) -> Rgb {
    let h = wrap_hue(hue) / 60.0;
    let s = clamp_percent(saturation) / 100.0;
    let v = clamp_percent(brightness) / 100.0;

    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    Rgb::from_unit(r, g, b)
}

/// RGB to hue/saturation. Achromatic input yields hue 0.
#[must_use]
pub fn rgb_to_hs(rgb: Rgb) -> Hs {
    let hsb = rgb_to_hsb(rgb);
    Hs {
        hue: hsb.hue,
        saturation: hsb.saturation,
    }
}

#[must_use]
pub fn rgb_to_hsb(rgb: Rgb) -> Hsb {
    let r = f64::from(rgb.r) / 255.0;
    let g = f64::from(rgb.g) / 255.0;
    let b = f64::from(rgb.b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f64::EPSILON {
        0.0
    } else if (max - r).abs() <= f64::EPSILON {
        60.0 * ((g - b) / delta)
    } else if (max - g).abs() <= f64::EPSILON {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let saturation = if max <= f64::EPSILON {
        0.0
    } else {
        delta / max * 100.0
    };

    Hsb::new(hue, saturation, max * 100.0)
}
