//! Fused activations and their quantized clamp ranges.

use kilo_core::{DType, KiloError, Result, Tensor};

/// Activation fused into an operator's output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FusedActivation {
    #[default]
    None,
    Relu,
    Relu6,
    ReluMinus1To1,
}

/// Clamp range for a fused activation in the output's quantized domain.
///
/// Real thresholds (0.0, ±1.0, 6.0) are mapped through the output's
/// scale/zero-point and intersected with the output dtype's representable
/// range, so the kernel clamps integers only.
pub fn activation_range_quantized(
    activation: FusedActivation,
    output: &Tensor,
) -> Result<(i32, i32)> {
    let (qmin, qmax) = output
        .dtype()
        .integer_range()
        .ok_or(KiloError::InvalidTensorDataType {
            tensor: "output",
            expected: DType::I8,
            got: output.dtype(),
        })?;
    let scale = output.quant().scale(0);
    let zero_point = output.quant().zero_point(0);
    let quantize = |real: f32| -> i32 { zero_point + (real / scale).round() as i32 };

    let range = match activation {
        FusedActivation::None => (qmin, qmax),
        FusedActivation::Relu => (quantize(0.0).max(qmin), qmax),
        FusedActivation::Relu6 => (quantize(0.0).max(qmin), quantize(6.0).min(qmax)),
        FusedActivation::ReluMinus1To1 => (quantize(-1.0).max(qmin), quantize(1.0).min(qmax)),
    };
    Ok(range)
}
