//! Register codec
//!
//! Pure conversions from a window of raw holding-register words to numeric values,
//! plus the scale-and-round step applied once per point after decoding.

use tracing::debug;

use crate::catalog::DataType;

/// Decimal places kept for engineering values
pub const VALUE_DECIMALS: usize = 3;

/// Decode the value starting at `offset` in `words`
///
/// Offsets past the end of the buffer decode to `0.0`. Callers are expected to
/// request a window that covers every point, so this only triggers on a
/// catalog/transport mismatch.
pub fn decode(data_type: DataType, words: &[u16], offset: usize) -> f64 {
    match data_type {
        DataType::Int16 => single(words, offset).map_or(0.0, |w| f64::from(w as i16)),
        DataType::Uint16 => single(words, offset).map_or(0.0, f64::from),
        DataType::Int32 => pair_ab(words, offset).map_or(0.0, |v| f64::from(v as i32)),
        DataType::Int32Swap => pair_ba(words, offset).map_or(0.0, |v| f64::from(v as i32)),
        DataType::Uint32 => pair_ab(words, offset).map_or(0.0, f64::from),
        DataType::Uint32Swap => pair_ba(words, offset).map_or(0.0, f64::from),
        DataType::Float => pair_ab(words, offset).map_or(0.0, |v| f64::from(f32::from_bits(v))),
        DataType::FloatSwap => {
            pair_ba(words, offset).map_or(0.0, |v| f64::from(f32::from_bits(v)))
        },
    }
}

fn single(words: &[u16], offset: usize) -> Option<u16> {
    let word = words.get(offset).copied();
    if word.is_none() {
        debug!("Register offset {} outside {}-word buffer", offset, words.len());
    }
    word
}

fn pair(words: &[u16], offset: usize) -> Option<(u16, u16)> {
    match (words.get(offset), words.get(offset + 1)) {
        (Some(&first), Some(&second)) => Some((first, second)),
        _ => {
            debug!(
                "Register pair at offset {} outside {}-word buffer",
                offset,
                words.len()
            );
            None
        },
    }
}

/// `words[offset]` is the high half
fn pair_ab(words: &[u16], offset: usize) -> Option<u32> {
    pair(words, offset).map(|(hi, lo)| (u32::from(hi) << 16) | u32::from(lo))
}

/// `words[offset]` is the low half
fn pair_ba(words: &[u16], offset: usize) -> Option<u32> {
    pair(words, offset).map(|(lo, hi)| (u32::from(hi) << 16) | u32::from(lo))
}

/// Apply the point's multiplier, then round half-up to [`VALUE_DECIMALS`] places
///
/// Values that round to zero come back as `0.0`, never `-0.0`.
pub fn scale_and_round(raw: f64, scale: f64) -> f64 {
    let rounded = round_half_up(raw * scale, VALUE_DECIMALS);
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Decimal round-half-up (away from zero on ties)
///
/// Rounds the shortest decimal representation of `value` rather than its binary
/// expansion, so `0.1235` becomes `0.124` even though the nearest `f64` lies just
/// below the tie.
pub fn round_half_up(value: f64, places: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // Display for f64 is the shortest round-trip form and never uses exponents
    let text = format!("{}", value.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if frac_part.len() <= places {
        return value;
    }

    let kept = &frac_part[..places];
    let round_up = frac_part.as_bytes()[places] >= b'5';

    let digits = format!("{int_part}{kept}");
    let Ok(mut mantissa) = digits.parse::<u128>() else {
        let factor = 10f64.powi(places as i32);
        return (value * factor).round() / factor;
    };
    if round_up {
        mantissa += 1;
    }

    let mut rounded = mantissa.to_string();
    if rounded.len() <= places {
        rounded = format!("{:0>width$}", rounded, width = places + 1);
    }
    let split = rounded.len() - places;
    let magnitude = format!("{}.{}", &rounded[..split], &rounded[split..])
        .parse::<f64>()
        .unwrap_or(value.abs());

    if value.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    }
}
