use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::attributes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Onoff,
    Brightness,
    White,
    ColorTemp,
    Hs,
    Xy,
    Rgb,
    Rgbw,
    Rgbww,
}

impl ColorMode {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let mode = match name.trim().to_ascii_lowercase().as_str() {
            "onoff" => Self::Onoff,
            "brightness" => Self::Brightness,
            "white" => Self::White,
            "color_temp" => Self::ColorTemp,
            "hs" => Self::Hs,
            "xy" => Self::Xy,
            "rgb" => Self::Rgb,
            "rgbw" => Self::Rgbw,
            "rgbww" => Self::Rgbww,
            _ => return None,
        };
        Some(mode)
    }

    #[must_use]
    pub const fn is_color(self) -> bool {
        matches!(
            self,
            Self::Hs | Self::Xy | Self::Rgb | Self::Rgbw | Self::Rgbww
        )
    }

    /// Encodings in the order a sender should prefer them.
    pub const COLOR_PRIORITY: [Self; 5] = [Self::Rgbww, Self::Rgbw, Self::Rgb, Self::Hs, Self::Xy];
}

/// Which control axes a light accepts. Immutable value, recomputed on every
/// refresh from the raw attribute set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCapabilities {
    /// Plain on/off mode reported, or nothing richer could be inferred
    pub onoff: bool,
    pub brightness: bool,
    pub color_temp: bool,
    pub color_hs: bool,
    pub preferred_color: Option<ColorMode>,
}

impl LightCapabilities {
    pub const ONOFF_ONLY: Self = Self {
        onoff: true,
        brightness: false,
        color_temp: false,
        color_hs: false,
        preferred_color: None,
    };

    /// Infer from a raw attribute value. Anything but an object is treated
    /// as a plain switchable light.
    #[must_use]
    pub fn from_value(attributes: &Value) -> Self {
        attributes
            .as_object()
            .map_or(Self::ONOFF_ONLY, Self::from_attributes)
    }

    #[must_use]
    pub fn from_attributes(attrs: &Map<String, Value>) -> Self {
        match attrs.get("supported_color_modes").and_then(Value::as_array) {
            Some(list) => {
                let modes = list
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(ColorMode::from_name)
                    .collect::<BTreeSet<_>>();
                Self::from_modes(&modes)
            }
            None => Self::from_presence(attrs),
        }
    }

    #[must_use]
    pub fn from_modes(modes: &BTreeSet<ColorMode>) -> Self {
        let color_temp = modes.contains(&ColorMode::ColorTemp);
        let color_hs = modes.iter().any(|m| m.is_color());
        let brightness = color_temp
            || color_hs
            || modes.contains(&ColorMode::Brightness)
            || modes.contains(&ColorMode::White);

        let preferred_color = ColorMode::COLOR_PRIORITY
            .into_iter()
            .find(|m| modes.contains(m));

        let mut caps = Self {
            onoff: modes.contains(&ColorMode::Onoff),
            brightness,
            color_temp,
            color_hs,
            preferred_color,
        };
        if !caps.onoff && !caps.brightness {
            // empty or unrecognised mode list
            caps.onoff = true;
        }
        caps
    }

    fn from_presence(attrs: &Map<String, Value>) -> Self {
        let present = |key: &str| attrs.contains_key(key);

        let color_temp = [
            "color_temp",
            "color_temp_kelvin",
            "min_mireds",
            "max_mireds",
            "min_color_temp_kelvin",
            "max_color_temp_kelvin",
        ]
        .into_iter()
        .any(present);

        let preferred_color = [
            ("rgb_color", ColorMode::Rgb),
            ("hs_color", ColorMode::Hs),
            ("xy_color", ColorMode::Xy),
        ]
        .into_iter()
        .find(|(key, _)| present(*key))
        .map(|(_, mode)| mode);
        let color_hs = preferred_color.is_some();

        let brightness = present("brightness") || color_temp || color_hs;

        Self {
            onoff: !brightness,
            brightness,
            color_temp,
            color_hs,
            preferred_color,
        }
    }

    #[must_use]
    pub const fn is_onoff_only(&self) -> bool {
        !self.brightness && !self.color_temp && !self.color_hs
    }
}

/// `supported_features` bitmask of a window covering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverFeatures(pub u32);

impl CoverFeatures {
    pub const OPEN: u32 = 1;
    pub const CLOSE: u32 = 2;
    pub const SET_POSITION: u32 = 4;
    pub const STOP: u32 = 8;
    pub const OPEN_TILT: u32 = 16;
    pub const CLOSE_TILT: u32 = 32;
    pub const STOP_TILT: u32 = 64;
    pub const SET_TILT_POSITION: u32 = 128;

    /// Use the bitmask when present, otherwise guess from which position
    /// attributes the hub reports.
    #[must_use]
    pub fn from_attributes(attrs: &Map<String, Value>) -> Self {
        if let Some(bits) = attributes::get_u32(attrs, "supported_features") {
            return Self(bits);
        }
        let mut bits = Self::OPEN | Self::CLOSE;
        if attributes::has(attrs, "current_position") {
            bits |= Self::SET_POSITION;
        }
        if attributes::has(attrs, "current_tilt_position") {
            bits |= Self::SET_TILT_POSITION;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    #[must_use]
    pub const fn can_set_position(self) -> bool {
        self.contains(Self::SET_POSITION)
    }

    #[must_use]
    pub const fn can_set_tilt(self) -> bool {
        self.contains(Self::SET_TILT_POSITION)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::model::capabilities::{ColorMode, CoverFeatures, LightCapabilities};

    fn caps(value: &Value) -> LightCapabilities {
        LightCapabilities::from_value(value)
    }

    #[test]
    fn color_temp_and_onoff_modes() {
        let c = caps(&json!({"supported_color_modes": ["color_temp", "onoff"]}));
        assert!(c.onoff);
        assert!(c.brightness);
        assert!(c.color_temp);
        assert!(!c.color_hs);
        assert_eq!(c.preferred_color, None);
    }

    #[test]
    fn preferred_color_priority() {
        let c = caps(&json!({"supported_color_modes": ["xy", "hs", "color_temp"]}));
        assert_eq!(c.preferred_color, Some(ColorMode::Hs));
        assert!(c.color_hs && c.color_temp && c.brightness);
        assert!(!c.onoff);

        let c = caps(&json!({"supported_color_modes": ["rgb", "rgbww", "rgbw"]}));
        assert_eq!(c.preferred_color, Some(ColorMode::Rgbww));

        let c = caps(&json!({"supported_color_modes": ["xy"]}));
        assert_eq!(c.preferred_color, Some(ColorMode::Xy));
    }

    #[test]
    fn order_independent() {
        let a = caps(&json!({"supported_color_modes": ["hs", "brightness", "color_temp"]}));
        let b = caps(&json!({"supported_color_modes": ["color_temp", "hs", "brightness"]}));
        assert_eq!(a, b);
    }

    #[test]
    fn brightness_and_white_modes() {
        let c = caps(&json!({"supported_color_modes": ["brightness"]}));
        assert!(c.brightness && !c.color_temp && !c.color_hs && !c.onoff);

        let c = caps(&json!({"supported_color_modes": ["white"]}));
        assert!(c.brightness);
    }

    #[test]
    fn unknown_modes_fall_back_to_onoff() {
        let c = caps(&json!({"supported_color_modes": ["sparkle", 3]}));
        assert_eq!(c, LightCapabilities::ONOFF_ONLY);
        assert!(c.is_onoff_only());
    }

    #[test]
    fn presence_heuristics() {
        let c = caps(&json!({"brightness": null}));
        assert!(c.brightness && !c.onoff && !c.color_temp && !c.color_hs);

        let c = caps(&json!({"min_mireds": 153, "max_mireds": 500}));
        assert!(c.color_temp && c.brightness);

        let c = caps(&json!({"xy_color": [0.3, 0.3], "rgb_color": [1, 2, 3]}));
        assert!(c.color_hs);
        assert_eq!(c.preferred_color, Some(ColorMode::Rgb));

        let c = caps(&json!({"friendly_name": "Lamp"}));
        assert_eq!(c, LightCapabilities::ONOFF_ONLY);
    }

    #[test]
    fn non_object_is_onoff_only() {
        assert_eq!(caps(&json!(null)), LightCapabilities::ONOFF_ONLY);
        assert_eq!(caps(&json!([1, 2])), LightCapabilities::ONOFF_ONLY);
    }

    #[test]
    fn cover_features() {
        let attrs = json!({"supported_features": 15});
        let f = CoverFeatures::from_attributes(attrs.as_object().unwrap());
        assert!(f.can_set_position());
        assert!(!f.can_set_tilt());

        let attrs = json!({"current_tilt_position": 40});
        let f = CoverFeatures::from_attributes(attrs.as_object().unwrap());
        assert!(!f.can_set_position());
        assert!(f.can_set_tilt());

        let attrs = json!({"current_position": null});
        let f = CoverFeatures::from_attributes(attrs.as_object().unwrap());
        assert!(!f.can_set_position());
    }
}
