use std::fmt;

use crate::dtype::DType;

/// Errors surfaced by the kilo runtime.
///
/// Every variant is fatal to the current inference pass: operators propagate
/// these up through the scheduler, which owns any retry decision. None of
/// them are locally recoverable.
#[derive(Debug, Clone, PartialEq)]
pub enum KiloError {
    /// A quantized filter is not per-channel quantized.
    InvalidQuantizationScheme { channels: usize },
    /// A tensor's data kind violates an operator's type contract.
    InvalidTensorDataType {
        tensor: &'static str,
        expected: DType,
        got: DType,
    },
    /// A filter's quantization channel count disagrees with its
    /// output-channel dimension.
    PerChannelMismatch { expected: usize, got: usize },
    /// The scratch pool cannot satisfy a request, even after compaction.
    OutOfMemory { requested: usize, available: usize },
    /// Dimensions do not line up.
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A required operator slot was not populated by the scheduler.
    SlotUnbound { slot: usize },
    /// A slot index is outside an operator's fixed arity.
    SlotOutOfRange { slot: usize, arity: usize },
    /// A pool handle no longer refers to a live region.
    InvalidHandle { index: usize },
    /// The pool's bind/unbind protocol was violated.
    PoolViolation(String),
    /// A quantization scale is non-positive or non-finite.
    InvalidQuantization { channel: usize },
    /// A tensor's data kind is not usable here.
    UnsupportedDType(DType),
}

impl fmt::Display for KiloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KiloError::InvalidQuantizationScheme { channels } => write!(
                f,
                "filter must be per-channel quantized, got {} channel(s)",
                channels
            ),
            KiloError::InvalidTensorDataType {
                tensor,
                expected,
                got,
            } => write!(f, "{} tensor must be {}, got {}", tensor, expected, got),
            KiloError::PerChannelMismatch { expected, got } => write!(
                f,
                "filter quantization has {} channel(s), output-channel dimension is {}",
                got, expected
            ),
            KiloError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "scratch pool exhausted: requested {} bytes, {} available",
                requested, available
            ),
            KiloError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            KiloError::SlotUnbound { slot } => write!(f, "operator slot {} is not bound", slot),
            KiloError::SlotOutOfRange { slot, arity } => {
                write!(f, "slot {} out of range for arity {}", slot, arity)
            }
            KiloError::InvalidHandle { index } => {
                write!(f, "pool handle {} is stale or invalid", index)
            }
            KiloError::PoolViolation(msg) => write!(f, "pool protocol violation: {}", msg),
            KiloError::InvalidQuantization { channel } => {
                write!(f, "quantization scale for channel {} must be positive", channel)
            }
            KiloError::UnsupportedDType(dtype) => write!(f, "unsupported dtype {}", dtype),
        }
    }
}

impl std::error::Error for KiloError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = KiloError::OutOfMemory {
            requested: 64,
            available: 16,
        };
        assert_eq!(
            format!("{}", e),
            "scratch pool exhausted: requested 64 bytes, 16 available"
        );

        let e = KiloError::InvalidTensorDataType {
            tensor: "bias",
            expected: DType::I32,
            got: DType::F32,
        };
        assert_eq!(format!("{}", e), "bias tensor must be i32, got f32");
    }
}
