//! Whole-number fields written by clients that only have floating-point
//! numbers.
//!
//! Any JSON number is accepted; it is rounded to the nearest whole number
//! and clamped to the field's range. `NaN` reads as zero.

use serde::{Deserialize, Deserializer};

fn whole(value: f64, max: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(max) {
        max
    } else {
        // In range after the checks above.
        value.round() as u32
    }
}

pub(crate) fn u8_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(u8::try_from(whole(value, u8::MAX.into())).unwrap_or(u8::MAX))
}

pub(crate) fn u32_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    f64::deserialize(deserializer).map(|value| whole(value, u32::MAX))
}

pub(crate) fn opt_u32_lenient<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u32>, D::Error> {
    Option::<f64>::deserialize(deserializer).map(|value| value.map(|v| whole(v, u32::MAX)))
}
