//! Homogeneous numeric arrays.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{CodecError, Result};

/// Element type of an [`NdArray`].
///
/// The tag is part of the `NumericArray` and `PointCloud` wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    U64 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::U32,
        DType::I32,
        DType::U64,
        DType::I64,
        DType::F32,
        DType::F64,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| CodecError::Corrupt(format!("unknown dtype tag {tag}")))
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Conventional name (`"uint8"`, `"float32"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::U64 => "uint64",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.name() == s)
            .ok_or_else(|| CodecError::Corrupt(format!("unknown dtype '{s}'")))
    }
}

/// A Rust scalar that can be stored in an [`NdArray`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(self, dst: &mut Vec<u8>);

    /// Read from exactly `DTYPE.size()` bytes.
    fn read_le(src: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn write_le(self, dst: &mut Vec<u8>) {
                dst.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(src: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(src);
                <$ty>::from_le_bytes(raw)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_element!(
    u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32,
    i32 => I32, u64 => U64, i64 => I64, f32 => F32, f64 => F64,
);

/// An n-dimensional array stored as a contiguous little-endian buffer in
/// row-major order.
#[derive(Clone, PartialEq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Wrap raw little-endian bytes. The length must match `shape` and `dtype`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(CodecError::ShapeMismatch {
                shape,
                dtype: dtype.name(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build from typed values.
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size());
        for value in values {
            value.write_le(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Raw little-endian buffer.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy out as typed values; `T` must match the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(CodecError::UnsupportedType(format!(
                "array holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(elements::<T>(&self.data).collect())
    }

    /// Widen every element to `f64`, whatever the dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self.dtype {
            DType::U8 => widen::<u8>(&self.data),
            DType::I8 => widen::<i8>(&self.data),
            DType::U16 => widen::<u16>(&self.data),
            DType::I16 => widen::<i16>(&self.data),
            DType::U32 => widen::<u32>(&self.data),
            DType::I32 => widen::<i32>(&self.data),
            DType::U64 => widen::<u64>(&self.data),
            DType::I64 => widen::<i64>(&self.data),
            DType::F32 => widen::<f32>(&self.data),
            DType::F64 => widen::<f64>(&self.data),
        }
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Bytes required for `shape` of `dtype`, failing on overflow.
pub(crate) fn byte_len(dtype: DType, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &extent| acc.checked_mul(extent))
        .ok_or_else(|| CodecError::Corrupt(format!("array shape {shape:?} overflows")))
}

fn elements<T: Element>(data: &[u8]) -> impl Iterator<Item = T> + '_ {
    data.chunks_exact(T::DTYPE.size()).map(T::read_le)
}

fn widen<T: Element>(data: &[u8]) -> Vec<f64> {
    elements::<T>(data).map(Element::to_f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_tags_and_names() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_tag(dtype.tag()).unwrap(), dtype);
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
        assert!(DType::from_tag(10).is_err());
        assert_eq!(DType::F32.to_string(), "float32");
    }

    #[test]
    fn from_vec_roundtrip() {
        let arr = NdArray::from_vec(vec![2, 3], vec![1i16, -2, 3, -4, 5, -6]).unwrap();
        assert_eq!(arr.dtype(), DType::I16);
        assert_eq!(arr.shape(), &[2, 3]);
        assert_eq!(arr.len(), 6);
        assert_eq!(arr.data().len(), 12);
        assert_eq!(arr.to_vec::<i16>().unwrap(), vec![1, -2, 3, -4, 5, -6]);
    }

    #[test]
    fn shape_mismatch_rejected() {
        let err = NdArray::from_vec(vec![4], vec![1.0f32, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ShapeMismatch {
                expected: 16,
                actual: 8,
                ..
            }
        ));
    }

    #[test]
    fn wrong_element_type_rejected() {
        let arr = NdArray::from_vec(vec![1], vec![1u8]).unwrap();
        assert!(matches!(
            arr.to_vec::<f32>(),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn widen_to_f64() {
        let arr = NdArray::from_vec(vec![3], vec![255u8, 0, 7]).unwrap();
        assert_eq!(arr.to_f64_vec(), vec![255.0, 0.0, 7.0]);
    }

    #[test]
    fn overflowing_shape_is_corrupt() {
        let err = NdArray::new(DType::F64, vec![usize::MAX, 2], Bytes::new()).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn zero_extent_is_empty() {
        let arr = NdArray::new(DType::F32, vec![0, 3], Bytes::new()).unwrap();
        assert!(arr.is_empty());
        assert_eq!(arr.len(), 0);
    }
}
