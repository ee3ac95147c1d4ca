use crate::dtype::DType;
use crate::error::KiloError;
use crate::quant::QuantizationParams;
use crate::shape::Shape;
use crate::Result;

/// Backing storage for tensor data, one variant per supported dtype.
#[derive(Debug, Clone, PartialEq)]
enum TensorData {
    I8(Vec<i8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

/// A shaped, quantized array — the data carrier operators execute against.
///
/// Shape and dtype are fixed at construction. Operators hold non-owning
/// references; the graph/runtime owns the tensors themselves. The only
/// mutation surface is the `as_*_mut` slice views kernels use to fill
/// outputs.
///
/// # Examples
///
/// ```
/// use kilo_core::{DType, QuantizationParams, Tensor};
///
/// let t = Tensor::from_i8(&[1, 2, 3, 4], &[1, 2, 2, 1]).unwrap();
/// assert_eq!(t.dtype(), DType::I8);
/// assert_eq!(t.shape().dims(), &[1, 2, 2, 1]);
///
/// let q = QuantizationParams::per_tensor(0.5, 0).unwrap();
/// let t = t.with_quant(q);
/// assert_eq!(t.quant().scale(0), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct Tensor {
    data: TensorData,
    shape: Shape,
    quant: QuantizationParams,
}

impl Tensor {
    /// Create an i8 tensor from data and shape.
    pub fn from_i8(data: &[i8], dims: &[usize]) -> Result<Self> {
        let shape = Shape::new(dims);
        check_len(data.len(), &shape)?;
        Ok(Self {
            data: TensorData::I8(data.to_vec()),
            shape,
            quant: QuantizationParams::default(),
        })
    }

    /// Create an i32 tensor from data and shape.
    pub fn from_i32(data: &[i32], dims: &[usize]) -> Result<Self> {
        let shape = Shape::new(dims);
        check_len(data.len(), &shape)?;
        Ok(Self {
            data: TensorData::I32(data.to_vec()),
            shape,
            quant: QuantizationParams::default(),
        })
    }

    /// Create an f32 tensor from data and shape.
    pub fn from_f32(data: &[f32], dims: &[usize]) -> Result<Self> {
        let shape = Shape::new(dims);
        check_len(data.len(), &shape)?;
        Ok(Self {
            data: TensorData::F32(data.to_vec()),
            shape,
            quant: QuantizationParams::default(),
        })
    }

    /// Create a zero-filled tensor of the given shape and dtype.
    pub fn zeros(dims: &[usize], dtype: DType) -> Result<Self> {
        let shape = Shape::new(dims);
        let numel = shape.numel();
        let data = match dtype {
            DType::I8 => TensorData::I8(vec![0; numel]),
            DType::I32 => TensorData::I32(vec![0; numel]),
            DType::F32 => TensorData::F32(vec![0.0; numel]),
            other => return Err(KiloError::UnsupportedDType(other)),
        };
        Ok(Self {
            data,
            shape,
            quant: QuantizationParams::default(),
        })
    }

    /// Attach quantization parameters (builder style).
    pub fn with_quant(mut self, quant: QuantizationParams) -> Self {
        self.quant = quant;
        self
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        match &self.data {
            TensorData::I8(_) => DType::I8,
            TensorData::I32(_) => DType::I32,
            TensorData::F32(_) => DType::F32,
        }
    }

    pub fn quant(&self) -> &QuantizationParams {
        &self.quant
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// View as an i8 slice, if this is an i8 tensor.
    pub fn as_i8(&self) -> Option<&[i8]> {
        match &self.data {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable view as an i8 slice, if this is an i8 tensor.
    pub fn as_i8_mut(&mut self) -> Option<&mut [i8]> {
        match &mut self.data {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }

    /// View as an i32 slice, if this is an i32 tensor.
    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable view as an i32 slice, if this is an i32 tensor.
    pub fn as_i32_mut(&mut self) -> Option<&mut [i32]> {
        match &mut self.data {
            TensorData::I32(v) => Some(v),
            _ => None,
        }
    }

    /// View as an f32 slice, if this is an f32 tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }
}

fn check_len(len: usize, shape: &Shape) -> Result<()> {
    if len != shape.numel() {
        return Err(KiloError::ShapeMismatch {
            expected: shape.dims().to_vec(),
            got: vec![len],
        });
    }
    Ok(())
}
