//! Reference per-channel quantized convolution kernel.
//!
//! Accumulates in i32, requantizes each accumulator with its channel's
//! fixed-point multiplier, adds the output offset, clamps, and stores i8.
//! Layouts: input/output NHWC, filter `[out_ch, fh, fw, in_ch]`, bias
//! `[out_ch]` i32. Shapes and dtypes are validated by the operator before
//! dispatch; this loop trusts its parameters.

use kilo_core::quant::multiply_by_quantized_multiplier;
use kilo_core::{KiloError, Result, Tensor};

use crate::padding::PaddingValues;

/// Fully-derived parameters for one kernel dispatch.
pub struct ConvKernelParams<'a> {
    pub padding: PaddingValues,
    pub stride: (usize, usize),
    pub dilation: (usize, usize),
    /// Per-output-channel Q31 significands.
    pub per_channel_multiplier: &'a [i32],
    /// Per-output-channel exponents.
    pub per_channel_shift: &'a [i32],
    /// `-input.zero_point(0)`, folded into every tap.
    pub input_offset: i32,
    /// `output.zero_point(0)`, added after requantization.
    pub output_offset: i32,
    pub activation_min: i32,
    pub activation_max: i32,
}

/// Run the convolution, writing quantized results into `output`.
pub fn conv2d_per_channel(
    output: &mut Tensor,
    input: &Tensor,
    filter: &Tensor,
    bias: Option<&Tensor>,
    params: &ConvKernelParams<'_>,
) -> Result<()> {
    let [batch, in_h, in_w, in_c] = dims4(input)?;
    let [out_c, f_h, f_w, _] = dims4(filter)?;
    let [_, out_h, out_w, _] = dims4(output)?;

    if params.per_channel_multiplier.len() < out_c || params.per_channel_shift.len() < out_c {
        return Err(KiloError::ShapeMismatch {
            expected: vec![out_c],
            got: vec![params.per_channel_multiplier.len()],
        });
    }

    let in_data = input
        .as_i8()
        .ok_or(KiloError::UnsupportedDType(input.dtype()))?;
    let f_data = filter
        .as_i8()
        .ok_or(KiloError::UnsupportedDType(filter.dtype()))?;
    let bias_data = match bias {
        Some(b) => Some(b.as_i32().ok_or(KiloError::UnsupportedDType(b.dtype()))?),
        None => None,
    };
    let out_dtype = output.dtype();
    let out_data = output
        .as_i8_mut()
        .ok_or(KiloError::UnsupportedDType(out_dtype))?;

    let (stride_h, stride_w) = params.stride;
    let (dilation_h, dilation_w) = params.dilation;
    let (pad_h, pad_w) = (params.padding.height as isize, params.padding.width as isize);

    for b in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                for oc in 0..out_c {
                    let mut acc: i32 = 0;
                    for fy in 0..f_h {
                        let iy = (oy * stride_h + fy * dilation_h) as isize - pad_h;
                        if iy < 0 || iy >= in_h as isize {
                            continue;
                        }
                        for fx in 0..f_w {
                            let ix = (ox * stride_w + fx * dilation_w) as isize - pad_w;
                            if ix < 0 || ix >= in_w as isize {
                                continue;
                            }
                            let in_base =
                                ((b * in_h + iy as usize) * in_w + ix as usize) * in_c;
                            let f_base = ((oc * f_h + fy) * f_w + fx) * in_c;
                            for ic in 0..in_c {
                                let x = i32::from(in_data[in_base + ic]) + params.input_offset;
                                let w = i32::from(f_data[f_base + ic]);
                                acc += x * w;
                            }
                        }
                    }
                    if let Some(bias) = bias_data {
                        acc += bias[oc];
                    }
                    let mut v = multiply_by_quantized_multiplier(
                        acc,
                        params.per_channel_multiplier[oc],
                        params.per_channel_shift[oc],
                    );
                    v += params.output_offset;
                    v = v.clamp(params.activation_min, params.activation_max);
                    out_data[((b * out_h + oy) * out_w + ox) * out_c + oc] = v as i8;
                }
            }
        }
    }
    Ok(())
}

fn dims4(t: &Tensor) -> Result<[usize; 4]> {
    match t.shape().dims() {
        &[a, b, c, d] => Ok([a, b, c, d]),
        dims => Err(KiloError::ShapeMismatch {
            expected: vec![0; 4],
            got: dims.to_vec(),
        }),
    }
}
