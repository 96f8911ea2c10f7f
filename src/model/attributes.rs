//! Lenient accessors for hub attribute maps.
//!
//! The hub is not strict about numeric types (`brightness` may arrive as
//! `128`, `128.0` or even `"128"` from some integrations), so everything
//! here accepts any json number and clamps instead of failing.

use serde_json::{Map, Value};

use lightcolor::{Hs, Rgb, XY};

pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn value_to_u8(value: &Value) -> Option<u8> {
    value_to_f64(value).map(|x| x.round().clamp(0.0, 255.0) as u8)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn value_to_u32(value: &Value) -> Option<u32> {
    value_to_f64(value).map(|x| x.round().clamp(0.0, f64::from(u32::MAX)) as u32)
}

fn parse_pair(value: &Value) -> Option<(f64, f64)> {
    let arr = value.as_array()?;
    let [a, b] = arr.as_slice() else {
        return None;
    };
    Some((value_to_f64(a)?, value_to_f64(b)?))
}

pub fn parse_hs_color(value: &Value) -> Option<Hs> {
    parse_pair(value).map(|(hue, sat)| Hs::new(hue, sat))
}

pub fn parse_xy_color(value: &Value) -> Option<XY> {
    parse_pair(value).map(|(x, y)| XY {
        x: x.clamp(0.0, 1.0),
        y: y.clamp(0.0, 1.0),
    })
}

pub fn parse_rgb_color(value: &Value) -> Option<Rgb> {
    let arr = value.as_array()?;
    let [r, g, b] = arr.as_slice() else {
        return None;
    };
    Some(Rgb::new(value_to_u8(r)?, value_to_u8(g)?, value_to_u8(b)?))
}

pub fn get_u8(attrs: &Map<String, Value>, key: &str) -> Option<u8> {
    attrs.get(key).and_then(value_to_u8)
}

pub fn get_u32(attrs: &Map<String, Value>, key: &str) -> Option<u32> {
    attrs.get(key).and_then(value_to_u32)
}

pub fn get_str<'a>(attrs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str)
}

/// True if the key is present with a non-null value.
pub fn has(attrs: &Map<String, Value>, key: &str) -> bool {
    attrs.get(key).is_some_and(|v| !v.is_null())
}
