//! Affine quantization metadata and fixed-point requantization math.
//!
//! A quantized tensor stores integers `q` related to real values by
//! `real = (q - zero_point) * scale`. Per-channel tensors carry one
//! `(scale, zero_point)` pair per output channel; per-tensor quantization is
//! the one-channel case. Kernels never touch floats at execution time:
//! scale ratios are folded into `(significand, shift)` fixed-point
//! multipliers ahead of the inner loop.

use crate::error::KiloError;
use crate::Result;

/// Affine quantization parameters for a tensor.
///
/// `num_channels() == 1` denotes per-tensor quantization. Accessors
/// broadcast channel 0 in that case, so callers can index by output channel
/// without branching on the scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationParams {
    scales: Vec<f32>,
    zero_points: Vec<i32>,
}

impl QuantizationParams {
    /// Per-tensor quantization: a single scale/zero-point pair.
    pub fn per_tensor(scale: f32, zero_point: i32) -> Result<Self> {
        Self::per_channel(&[scale], &[zero_point])
    }

    /// Per-channel quantization: one scale/zero-point pair per channel.
    ///
    /// Every scale must be positive and finite; the two slices must be the
    /// same non-zero length.
    pub fn per_channel(scales: &[f32], zero_points: &[i32]) -> Result<Self> {
        if scales.is_empty() || scales.len() != zero_points.len() {
            return Err(KiloError::ShapeMismatch {
                expected: vec![scales.len().max(1)],
                got: vec![zero_points.len()],
            });
        }
        for (channel, &scale) in scales.iter().enumerate() {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(KiloError::InvalidQuantization { channel });
            }
        }
        Ok(Self {
            scales: scales.to_vec(),
            zero_points: zero_points.to_vec(),
        })
    }

    /// Number of quantization channels.
    pub fn num_channels(&self) -> usize {
        self.scales.len()
    }

    /// Whether this is per-channel (as opposed to per-tensor) quantization.
    pub fn is_per_channel(&self) -> bool {
        self.scales.len() > 1
    }

    /// Scale for `channel`, broadcasting channel 0 when per-tensor.
    pub fn scale(&self, channel: usize) -> f32 {
        if self.scales.len() == 1 {
            self.scales[0]
        } else {
            self.scales[channel]
        }
    }

    /// Zero point for `channel`, broadcasting channel 0 when per-tensor.
    pub fn zero_point(&self, channel: usize) -> i32 {
        if self.zero_points.len() == 1 {
            self.zero_points[0]
        } else {
            self.zero_points[channel]
        }
    }
}

impl Default for QuantizationParams {
    /// Identity quantization: scale 1.0, zero point 0.
    fn default() -> Self {
        Self {
            scales: vec![1.0],
            zero_points: vec![0],
        }
    }
}

/// Decompose a non-negative real multiplier into a Q31 fixed-point pair.
///
/// Returns `(significand, shift)` such that
/// `multiplier ≈ significand * 2^(shift - 31)` with the significand
/// normalized into `[2^30, 2^31)` — i.e. `0.5 <= significand / 2^31 < 1`.
/// Zero maps to `(0, 0)`, as do multipliers too small to represent
/// (`shift < -31`).
pub fn quantize_multiplier(multiplier: f64) -> (i32, i32) {
    debug_assert!(multiplier >= 0.0);
    if multiplier == 0.0 {
        return (0, 0);
    }
    let (fraction, mut shift) = frexp(multiplier);
    let mut significand = (fraction * (1i64 << 31) as f64).round() as i64;
    // Rounding can carry all the way up to 2^31; renormalize.
    if significand == 1i64 << 31 {
        significand /= 2;
        shift += 1;
    }
    if shift < -31 {
        return (0, 0);
    }
    (significand as i32, shift)
}

/// `frexp` for f64 (std has no equivalent): returns `(fraction, exponent)`
/// with `|fraction|` in `[0.5, 1)` and `x == fraction * 2^exponent`.
pub fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // Subnormal: renormalize through a 2^64 scale first.
        let (fraction, exponent) = frexp(x * (1u128 << 64) as f64);
        return (fraction, exponent - 64);
    }
    let exponent = biased - 1022;
    let fraction = f64::from_bits((bits & 0x800f_ffff_ffff_ffff) | (1022u64 << 52));
    (fraction, exponent)
}

/// Saturating rounding doubling high multiply: `round(a * b / 2^31)` with
/// the single overflow case (`i32::MIN * i32::MIN`) saturated.
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let product = i64::from(a) * i64::from(b);
    let nudge = if product >= 0 {
        1i64 << 30
    } else {
        1 - (1i64 << 30)
    };
    ((product + nudge) >> 31) as i32
}

/// Rounding arithmetic right shift (round-half-away-from-zero).
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    if exponent == 0 {
        return x;
    }
    let mask = (1i64 << exponent) - 1;
    let remainder = i64::from(x) & mask;
    let threshold = (mask >> 1) + i64::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

/// Apply a `(significand, shift)` fixed-point multiplier to `x`.
///
/// This is the requantization step quantized kernels run on every
/// accumulator: positive shifts scale up before the high multiply, negative
/// shifts round down afterwards.
pub fn multiply_by_quantized_multiplier(x: i32, significand: i32, shift: i32) -> i32 {
    let left_shift = shift.max(0);
    let right_shift = (-shift).max(0);
    debug_assert!(left_shift < 32 && right_shift < 32);
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(x << left_shift, significand),
        right_shift,
    )
}
