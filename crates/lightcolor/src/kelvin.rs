//! Color temperature helpers.
//!
//! Mired and Kelvin are reciprocal (`mired = 1_000_000 / kelvin`). Both
//! directions floor their input at 1 and fall back to a warm-white default
//! for non-finite input, since they sit on the UI refresh path.

use crate::Rgb;

pub const WARM_WHITE_KELVIN: f64 = 2700.0;
pub const WARM_WHITE_MIRED: f64 = 1_000_000.0 / WARM_WHITE_KELVIN;

/// Household range used for preview swatches.
pub const PREVIEW_MIN_KELVIN: f64 = 1800.0;
pub const PREVIEW_MAX_KELVIN: f64 = 6500.0;

#[must_use]
pub fn kelvin_to_mired(kelvin: f64) -> f64 {
    if !kelvin.is_finite() {
        return WARM_WHITE_MIRED;
    }
    1_000_000.0 / kelvin.max(1.0)
}

#[must_use]
pub fn mired_to_kelvin(mired: f64) -> f64 {
    if !mired.is_finite() {
        return WARM_WHITE_KELVIN;
    }
    1_000_000.0 / mired.max(1.0)
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kelvin_to_mired_rounded(kelvin: f64) -> u32 {
    kelvin_to_mired(kelvin).round() as u32
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mired_to_kelvin_rounded(mired: f64) -> u32 {
    mired_to_kelvin(mired).round() as u32
}

/// Approximate sRGB for a black-body temperature, for on-device previews
/// only. Input is clamped to the household range.
#[must_use]
pub fn kelvin_to_rgb(kelvin: f64) -> Rgb {
    let kelvin = if kelvin.is_finite() {
        kelvin.clamp(PREVIEW_MIN_KELVIN, PREVIEW_MAX_KELVIN)
    } else {
        WARM_WHITE_KELVIN
    };
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

    Rgb::from_unit(red / 255.0, green / 255.0, blue / 255.0)
}
