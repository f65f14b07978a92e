//! FP2 compact float decoding.
//!
//! FP2 is the Campbell Scientific 16-bit floating point encoding: 1 sign
//! bit, a 2-bit decimal exponent selector, and a 13-bit unsigned mantissa.
//! The exponent selects a power-of-ten scale rather than a binary one, so
//! the decoded value is always an exact multiple of 1, 0.1, 0.01, or 0.001.

const SIGN: u16 = 0x8000;
const EXPONENT: u16 = 0x6000;
const MANTISSA: u16 = 0x1fff;

/// Decode a raw big-endian FP2 word into a float.
///
/// Reproduces the reference scale table bit-for-bit: no rounding is
/// performed beyond the single mantissa-by-scale multiplication.
#[must_use]
pub fn decode(raw: u16) -> f64 {
    let mantissa = f64::from(raw & MANTISSA);
    let value = match (raw & EXPONENT) >> 13 {
        0 => mantissa,
        1 => mantissa * 1e-1,
        2 => mantissa * 1e-2,
        _ => mantissa * 1e-3,
    };
    if raw & SIGN == 0 {
        value
    } else {
        -value
    }
}
