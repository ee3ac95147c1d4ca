//! Quantized 2-D convolution operator.
//!
//! Orchestrates one invocation end to end: geometry and quantization-scheme
//! validation, padding derivation, scratch acquisition from the context
//! pool, per-channel requantization parameters, kernel dispatch, and scratch
//! release on every exit path. Validation runs strictly before any scratch
//! is committed, so a rejected invocation leaves the pool untouched.

use kilo_core::quant::quantize_multiplier;
use kilo_core::{DType, KiloError, Result, Tensor};

use crate::activation::{activation_range_quantized, FusedActivation};
use crate::context::ExecutionContext;
use crate::kernel::{self, ConvKernelParams};
use crate::op::{Conv2dInputs, Conv2dOutputs};
use crate::padding::{padding_height_width, Padding, PaddingValues};
use crate::pool::Handle;

/// Filter layout convention: `[out_channels, height, width, in_channels]`.
pub const FILTER_OUT_CHANNELS_DIM: usize = 0;
pub const FILTER_HEIGHT_DIM: usize = 1;
pub const FILTER_WIDTH_DIM: usize = 2;
pub const FILTER_IN_CHANNELS_DIM: usize = 3;

/// Per-invocation geometry, derived before any scratch is committed.
struct OpData {
    channels: usize,
    padding: PaddingValues,
}

/// 2-D convolution over per-channel-quantized i8 tensors.
///
/// Configuration is fixed at construction; everything per-invocation is
/// transient inside [`Conv2dOperator::compute`], so one instance serves
/// every pass of the model's lifetime.
pub struct Conv2dOperator {
    stride: (u16, u16),
    padding: Padding,
    dilation: (u16, u16),
    activation: FusedActivation,
}

impl Conv2dOperator {
    /// Input slot indices.
    pub const INPUT: usize = 0;
    pub const FILTER: usize = 1;
    pub const BIAS: usize = 2;
    /// Output slot index.
    pub const OUTPUT: usize = 0;

    /// Convolution with unit dilation and no fused activation.
    pub fn new(strides: (u16, u16), padding: Padding) -> Self {
        Self::with_options(strides, padding, (1, 1), FusedActivation::None)
    }

    pub fn with_options(
        strides: (u16, u16),
        padding: Padding,
        dilation: (u16, u16),
        activation: FusedActivation,
    ) -> Self {
        Self {
            stride: strides,
            padding,
            dilation,
            activation,
        }
    }

    /// Execute one invocation against bound slots.
    pub fn compute(
        &self,
        ctx: &mut ExecutionContext,
        inputs: &Conv2dInputs<'_>,
        outputs: &mut Conv2dOutputs<'_>,
    ) -> Result<()> {
        let input = match inputs.get(Self::INPUT) {
            Ok(t) => t,
            Err(e) => return Err(ctx.fail(e)),
        };
        let filter = match inputs.get(Self::FILTER) {
            Ok(t) => t,
            Err(e) => return Err(ctx.fail(e)),
        };
        let bias = inputs.try_get(Self::BIAS);
        let output = match outputs.get_mut(Self::OUTPUT) {
            Ok(t) => t,
            Err(e) => return Err(ctx.fail(e)),
        };

        let op_data = match self.plan(input, filter, bias, output) {
            Ok(d) => d,
            Err(e) => return Err(ctx.fail(e)),
        };

        // Two per-channel scratch regions (multiplier, shift), bound the
        // instant they exist so no compacting call can drop them.
        let scratch_bytes = 4 * op_data.channels;
        let multiplier_h = match ctx.pool_mut().acquire(scratch_bytes) {
            Ok(h) => h,
            Err(e) => return Err(ctx.fail(e)),
        };
        let shift_h = match ctx.pool_mut().acquire(scratch_bytes) {
            Ok(h) => h,
            Err(e) => {
                ctx.pool_mut().release(multiplier_h)?;
                return Err(ctx.fail(e));
            }
        };

        let result = self.dispatch(ctx, input, filter, bias, output, &op_data, multiplier_h, shift_h);

        // Reverse acquisition order, on success and failure alike.
        ctx.pool_mut().release(shift_h)?;
        ctx.pool_mut().release(multiplier_h)?;

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(ctx.fail(e)),
        }
    }

    /// Validate shapes, dtypes, and quantization scheme; derive padding.
    ///
    /// Check order is part of the contract: quantization scheme, then
    /// dtypes, then channel agreement — all before the caller commits any
    /// scratch.
    fn plan(
        &self,
        input: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        output: &Tensor,
    ) -> Result<OpData> {
        let in_dims = dims4(input)?;
        let f_dims = dims4(filter)?;
        let channels = f_dims[FILTER_OUT_CHANNELS_DIM];
        let stride = (usize::from(self.stride.0), usize::from(self.stride.1));
        let dilation = (usize::from(self.dilation.0), usize::from(self.dilation.1));
        let (padding, (out_h, out_w)) = padding_height_width(
            self.padding,
            stride,
            dilation,
            (in_dims[1], in_dims[2]),
            (f_dims[FILTER_HEIGHT_DIM], f_dims[FILTER_WIDTH_DIM]),
        );

        let quant_channels = filter.quant().num_channels();
        if quant_channels <= 1 {
            return Err(KiloError::InvalidQuantizationScheme {
                channels: quant_channels,
            });
        }
        if input.dtype() != DType::I8 {
            return Err(KiloError::InvalidTensorDataType {
                tensor: "input",
                expected: DType::I8,
                got: input.dtype(),
            });
        }
        if filter.dtype() != DType::I8 {
            return Err(KiloError::InvalidTensorDataType {
                tensor: "filter",
                expected: DType::I8,
                got: filter.dtype(),
            });
        }
        if let Some(bias) = bias {
            if bias.dtype() != DType::I32 {
                return Err(KiloError::InvalidTensorDataType {
                    tensor: "bias",
                    expected: DType::I32,
                    got: bias.dtype(),
                });
            }
        }
        if quant_channels != channels {
            return Err(KiloError::PerChannelMismatch {
                expected: channels,
                got: quant_channels,
            });
        }

        if f_dims[FILTER_IN_CHANNELS_DIM] != in_dims[3] {
            return Err(KiloError::ShapeMismatch {
                expected: vec![in_dims[3]],
                got: vec![f_dims[FILTER_IN_CHANNELS_DIM]],
            });
        }
        if let Some(bias) = bias {
            if bias.numel() != channels {
                return Err(KiloError::ShapeMismatch {
                    expected: vec![channels],
                    got: bias.shape().dims().to_vec(),
                });
            }
        }
        if output.dtype() != DType::I8 {
            return Err(KiloError::InvalidTensorDataType {
                tensor: "output",
                expected: DType::I8,
                got: output.dtype(),
            });
        }
        // The output size is re-derived here and checked against the bound
        // tensor rather than trusted from upstream.
        let expected_out = [in_dims[0], out_h, out_w, channels];
        if output.shape().dims() != expected_out {
            return Err(KiloError::ShapeMismatch {
                expected: expected_out.to_vec(),
                got: output.shape().dims().to_vec(),
            });
        }

        Ok(OpData { channels, padding })
    }

    /// Fill the per-channel scratch arrays and hand off to the kernel.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        ctx: &mut ExecutionContext,
        input: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        output: &mut Tensor,
        op_data: &OpData,
        multiplier_h: Handle,
        shift_h: Handle,
    ) -> Result<()> {
        // Input and output are per-tensor quantized; channel 0 is the pair.
        let input_scale = f64::from(input.quant().scale(0));
        let output_scale = f64::from(output.quant().scale(0));
        {
            let (mult, shift) = ctx.pool_mut().i32_view_pair_mut(multiplier_h, shift_h)?;
            for c in 0..op_data.channels {
                let effective = input_scale * f64::from(filter.quant().scale(c)) / output_scale;
                let (m, s) = quantize_multiplier(effective);
                mult[c] = m;
                shift[c] = s;
            }
        }

        let (activation_min, activation_max) =
            activation_range_quantized(self.activation, output)?;
        let input_offset = -input.quant().zero_point(0);
        let output_offset = output.quant().zero_point(0);

        log::debug!(
            "conv2d: {}x{} filter, {} channels, padding {:?}, clamp [{}, {}]",
            filter.shape().dim(FILTER_HEIGHT_DIM).unwrap_or(0),
            filter.shape().dim(FILTER_WIDTH_DIM).unwrap_or(0),
            op_data.channels,
            op_data.padding,
            activation_min,
            activation_max,
        );

        let pool = ctx.pool();
        let params = ConvKernelParams {
            padding: op_data.padding,
            stride: (usize::from(self.stride.0), usize::from(self.stride.1)),
            dilation: (usize::from(self.dilation.0), usize::from(self.dilation.1)),
            per_channel_multiplier: pool.i32_view(multiplier_h)?,
            per_channel_shift: pool.i32_view(shift_h)?,
            input_offset,
            output_offset,
            activation_min,
            activation_max,
        };
        kernel::conv2d_per_channel(output, input, filter, bias, &params)
    }
}

impl Default for Conv2dOperator {
    /// Unit stride, SAME padding.
    fn default() -> Self {
        Self::new((1, 1), Padding::Same)
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use kilo_core::QuantizationParams;

    fn per_channel(scales: &[f32]) -> QuantizationParams {
        QuantizationParams::per_channel(scales, &vec![0; scales.len()]).unwrap()
    }

    fn setup() -> (Tensor, Tensor, Tensor, Tensor) {
        let input = Tensor::from_i8(&[2, 4, 6, 8], &[1, 2, 2, 1])
            .unwrap()
            .with_quant(QuantizationParams::per_tensor(0.5, 0).unwrap());
        let filter = Tensor::from_i8(&[1, 2], &[2, 1, 1, 1])
            .unwrap()
            .with_quant(per_channel(&[0.25, 0.5]));
        let bias = Tensor::from_i32(&[4, -2], &[2]).unwrap();
        let output = Tensor::zeros(&[1, 2, 2, 2], DType::I8)
            .unwrap()
            .with_quant(QuantizationParams::per_tensor(0.125, 1).unwrap());
        (input, filter, bias, output)
    }

    fn run(
        ctx: &mut ExecutionContext,
        op: &Conv2dOperator,
        input: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        output: &mut Tensor,
    ) -> Result<()> {
        let mut inputs = Conv2dInputs::new();
        inputs.bind(Conv2dOperator::INPUT, input).unwrap();
        inputs.bind(Conv2dOperator::FILTER, filter).unwrap();
        if let Some(b) = bias {
            inputs.bind(Conv2dOperator::BIAS, b).unwrap();
        }
        let mut outputs = Conv2dOutputs::new();
        outputs.bind(Conv2dOperator::OUTPUT, output).unwrap();
        op.compute(ctx, &inputs, &mut outputs)
    }

    #[test]
    fn test_scheme_validation_commits_no_scratch() {
        let (input, _, bias, mut output) = setup();
        // Per-tensor filter quantization on a 2-output-channel filter.
        let filter = Tensor::from_i8(&[1, 2], &[2, 1, 1, 1])
            .unwrap()
            .with_quant(QuantizationParams::per_tensor(0.25, 0).unwrap());
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let err = run(&mut ctx, &op, &input, &filter, Some(&bias), &mut output).unwrap_err();
        assert_eq!(err, KiloError::InvalidQuantizationScheme { channels: 1 });
        assert_eq!(ctx.pool().live_bytes(), 0);
        assert_eq!(ctx.pool().used(), 0);
        assert_eq!(ctx.last_error(), Some(&err));
    }

    #[test]
    fn test_dtype_validation() {
        let (input, filter, _, mut output) = setup();
        let bad_bias = Tensor::from_f32(&[4.0, -2.0], &[2]).unwrap();
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let err = run(&mut ctx, &op, &input, &filter, Some(&bad_bias), &mut output).unwrap_err();
        assert_eq!(
            err,
            KiloError::InvalidTensorDataType {
                tensor: "bias",
                expected: DType::I32,
                got: DType::F32,
            }
        );
        assert_eq!(ctx.pool().live_bytes(), 0);
    }

    #[test]
    fn test_per_channel_mismatch() {
        let (input, _, bias, mut output) = setup();
        // Three quantization channels on a 2-output-channel filter.
        let filter = Tensor::from_i8(&[1, 2], &[2, 1, 1, 1])
            .unwrap()
            .with_quant(per_channel(&[0.25, 0.5, 0.75]));
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let err = run(&mut ctx, &op, &input, &filter, Some(&bias), &mut output).unwrap_err();
        assert_eq!(err, KiloError::PerChannelMismatch { expected: 2, got: 3 });
        assert_eq!(ctx.pool().live_bytes(), 0);
    }

    #[test]
    fn test_output_shape_is_rederived() {
        let (input, filter, bias, _) = setup();
        let mut wrong = Tensor::zeros(&[1, 3, 3, 2], DType::I8)
            .unwrap()
            .with_quant(QuantizationParams::per_tensor(0.125, 1).unwrap());
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let err = run(&mut ctx, &op, &input, &filter, Some(&bias), &mut wrong).unwrap_err();
        assert_eq!(
            err,
            KiloError::ShapeMismatch {
                expected: vec![1, 2, 2, 2],
                got: vec![1, 3, 3, 2],
            }
        );
    }

    #[test]
    fn test_unbound_slot() {
        let (input, _, _, mut output) = setup();
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let mut inputs = Conv2dInputs::new();
        inputs.bind(Conv2dOperator::INPUT, &input).unwrap();
        let mut outputs = Conv2dOutputs::new();
        outputs.bind(Conv2dOperator::OUTPUT, &mut output).unwrap();
        let err = op.compute(&mut ctx, &inputs, &mut outputs).unwrap_err();
        assert_eq!(err, KiloError::SlotUnbound { slot: Conv2dOperator::FILTER });
    }

    #[test]
    fn test_compute_end_to_end() {
        let (input, filter, bias, mut output) = setup();
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        run(&mut ctx, &op, &input, &filter, Some(&bias), &mut output).unwrap();
        // effective scales 1.0 and 2.0; oc0 = in + 4 + zp, oc1 = 2*(2*in - 2) + zp.
        assert_eq!(output.as_i8().unwrap(), &[7, 5, 9, 13, 11, 21, 13, 29]);
        assert_eq!(ctx.pool().live_bytes(), 0);
        assert_eq!(ctx.pool().used(), 0);
    }

    #[test]
    fn test_oom_releases_partial_scratch() {
        let (input, filter, bias, mut output) = setup();
        // Room for exactly one of the two 8-byte scratch regions.
        let mut ctx = ExecutionContext::with_pool_capacity(8);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        let err = run(&mut ctx, &op, &input, &filter, Some(&bias), &mut output).unwrap_err();
        assert!(matches!(err, KiloError::OutOfMemory { .. }));
        assert_eq!(ctx.pool().live_bytes(), 0);
        assert_eq!(ctx.pool().used(), 0);
    }

    #[test]
    fn test_net_usage_stable_across_mixed_outcomes() {
        let (input, filter, bias, mut output) = setup();
        let bad_bias = Tensor::from_f32(&[0.0, 0.0], &[2]).unwrap();
        let mut ctx = ExecutionContext::with_pool_capacity(256);
        let op = Conv2dOperator::new((1, 1), Padding::Valid);
        for round in 0..4 {
            let result = if round % 2 == 0 {
                run(&mut ctx, &op, &input, &filter, Some(&bias), &mut output)
            } else {
                run(&mut ctx, &op, &input, &filter, Some(&bad_bias), &mut output)
            };
            assert_eq!(result.is_ok(), round % 2 == 0);
            assert_eq!(ctx.pool().live_bytes(), 0, "leak after round {round}");
        }
    }
}
