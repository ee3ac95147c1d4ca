//! # kilo-core
//!
//! Tensor and quantization data model for the kilo inference runtime.
//!
//! Provides the data carriers operators execute against:
//! - `Tensor` with integer dtypes and affine quantization metadata
//! - `QuantizationParams` (per-tensor and per-channel)
//! - The fixed-point requantization math shared by quantized kernels
//! - The runtime-wide error type

pub mod dtype;
pub mod error;
pub mod quant;
pub mod shape;
pub mod tensor;

pub use dtype::DType;
pub use error::KiloError;
pub use quant::QuantizationParams;
pub use shape::Shape;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, KiloError>;
