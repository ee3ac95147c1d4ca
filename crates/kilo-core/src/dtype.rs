use std::fmt;

/// Element data kinds supported by kilo tensors.
///
/// Quantized inference runs on the integer kinds; `F32` exists so that
/// upstream graphs carrying float tensors can still be described (and
/// rejected) by operators with integer-only contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 32-bit IEEE 754 single-precision float
    F32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
        }
    }

    /// Whether this dtype is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, DType::I8 | DType::U8 | DType::I16 | DType::I32)
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32)
    }

    /// Representable `(min, max)` range for integer kinds, widened to i32.
    ///
    /// Activation clamps intersect against this range. `None` for floats.
    pub fn integer_range(&self) -> Option<(i32, i32)> {
        match self {
            DType::I8 => Some((i32::from(i8::MIN), i32::from(i8::MAX))),
            DType::U8 => Some((0, i32::from(u8::MAX))),
            DType::I16 => Some((i32::from(i16::MIN), i32::from(i16::MAX))),
            DType::I32 => Some((i32::MIN, i32::MAX)),
            DType::F32 => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::F32 => write!(f, "f32"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::I8.element_size(), 1);
        assert_eq!(DType::U8.element_size(), 1);
        assert_eq!(DType::I16.element_size(), 2);
        assert_eq!(DType::I32.element_size(), 4);
        assert_eq!(DType::F32.element_size(), 4);
    }

    #[test]
    fn test_dtype_categories() {
        assert!(DType::I8.is_integer());
        assert!(!DType::I8.is_float());
        assert!(DType::F32.is_float());
        assert!(!DType::F32.is_integer());
    }

    #[test]
    fn test_integer_range() {
        assert_eq!(DType::I8.integer_range(), Some((-128, 127)));
        assert_eq!(DType::U8.integer_range(), Some((0, 255)));
        assert_eq!(DType::I16.integer_range(), Some((-32768, 32767)));
        assert_eq!(DType::F32.integer_range(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", DType::I8), "i8");
        assert_eq!(format!("{}", DType::I32), "i32");
        assert_eq!(format!("{}", DType::F32), "f32");
    }
}
