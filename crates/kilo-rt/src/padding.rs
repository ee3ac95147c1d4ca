//! Spatial padding arithmetic shared by windowed operators.

/// Padding mode for windowed operators.
///
/// `Same` pads so the output spatial size is `ceil(input / stride)`;
/// `Valid` uses no padding, shrinking the output by the filter extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Padding {
    Same,
    Valid,
}

/// Computed padding extents, in elements, applied to the leading edge of
/// each spatial dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingValues {
    pub height: usize,
    pub width: usize,
}

/// Output extent along one spatial dimension.
pub fn output_size(
    input: usize,
    filter: usize,
    stride: usize,
    dilation: usize,
    padding: Padding,
) -> usize {
    let effective_filter = (filter - 1) * dilation + 1;
    match padding {
        Padding::Same => input.div_ceil(stride),
        Padding::Valid => (input + stride).saturating_sub(effective_filter) / stride,
    }
}

/// Padding along one spatial dimension for a given output extent.
fn padding_size(input: usize, filter: usize, stride: usize, dilation: usize, output: usize) -> usize {
    let effective_filter = (filter - 1) * dilation + 1;
    let span = (output.max(1) - 1) * stride + effective_filter;
    span.saturating_sub(input) / 2
}

/// Derive padding extents and output spatial size for both dimensions.
///
/// Returns `(padding, (out_height, out_width))`. Callers are expected to
/// check the derived output size against the tensor they are about to
/// write, not to trust it blindly.
pub fn padding_height_width(
    mode: Padding,
    stride: (usize, usize),
    dilation: (usize, usize),
    input_hw: (usize, usize),
    filter_hw: (usize, usize),
) -> (PaddingValues, (usize, usize)) {
    let out_h = output_size(input_hw.0, filter_hw.0, stride.0, dilation.0, mode);
    let out_w = output_size(input_hw.1, filter_hw.1, stride.1, dilation.1, mode);
    let values = match mode {
        Padding::Same => PaddingValues {
            height: padding_size(input_hw.0, filter_hw.0, stride.0, dilation.0, out_h),
            width: padding_size(input_hw.1, filter_hw.1, stride.1, dilation.1, out_w),
        },
        Padding::Valid => PaddingValues::default(),
    };
    (values, (out_h, out_w))
}
