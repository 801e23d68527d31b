//! Quantizers behind the column-compressed matrix format.
//!
//! A compressed matrix stores one global `(min, range)` pair, four 16-bit
//! percentile codes per column and one byte per element. Bytes are spread
//! non-uniformly across the column's percentile brackets so the central half
//! of the distribution gets 128 of the 256 levels.

/// Largest 16-bit code, mapped onto `min + range`.
const U16_MAX: f32 = 65535.0;

/// Byte value at the `p25` breakpoint.
const P25_CODE: u8 = 64;

/// Byte value at the `p75` breakpoint.
const P75_CODE: u8 = 192;

/// Per-column percentile table `(p0, p25, p75, p100)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Quantiles {
    pub p0: f32,
    pub p25: f32,
    pub p75: f32,
    pub p100: f32,
}

impl Quantiles {
    pub fn new(p0: f32, p25: f32, p75: f32, p100: f32) -> Self {
        Self { p0, p25, p75, p100 }
    }

    /// Reconstruct a table from its four 16-bit codes.
    pub fn from_codes(codes: [u16; 4], min_value: f32, range: f32) -> Self {
        let [p0, p25, p75, p100] = codes.map(|code| dequantize16(code, min_value, range));
        Self { p0, p25, p75, p100 }
    }
}

/// Map a 16-bit code linearly onto `[min_value, min_value + range]`.
pub fn dequantize16(code: u16, min_value: f32, range: f32) -> f32 {
    min_value + range * (code as f32 / U16_MAX)
}

/// Map a byte onto its column's percentile brackets.
///
/// Codes `0..=64` interpolate `[p0, p25]`, `65..=192` interpolate
/// `[p25, p75]` and `193..=255` interpolate `[p75, p100]`.
pub fn dequantize8(code: u8, q: &Quantiles) -> f32 {
    if code <= P25_CODE {
        q.p0 + (q.p25 - q.p0) * (code as f32 / 64.0)
    } else if code <= P75_CODE {
        q.p25 + (q.p75 - q.p25) * ((code - P25_CODE) as f32 / 128.0)
    } else {
        q.p75 + (q.p100 - q.p75) * ((code - P75_CODE) as f32 / 63.0)
    }
}

/// Nearest 16-bit code for `value`, clamped to the representable range.
pub fn quantize16(value: f32, min_value: f32, range: f32) -> u16 {
    let fraction = ((value - min_value) / range).clamp(0.0, 1.0);
    (fraction * U16_MAX + 0.499) as u16
}

/// Nearest byte code for `value` inside its percentile bracket.
pub fn quantize8(value: f32, q: &Quantiles) -> u8 {
    let (base, width, lo, hi) = if value < q.p25 {
        (0, 64.0, q.p0, q.p25)
    } else if value < q.p75 {
        (P25_CODE, 128.0, q.p25, q.p75)
    } else {
        (P75_CODE, 63.0, q.p75, q.p100)
    };

    let fraction = (value - lo) / (hi - lo);
    let step = (fraction * width + 0.5).clamp(0.0, width) as u8;
    base + step
}
