//! Raw numeric array codec.
//!
//! ```text
//! dtype u8 | ndim u8 | extent u32 LE * ndim | little-endian elements
//! ```

use bytes::{Buf, BufMut};

use crate::array::{byte_len, DType, NdArray};
use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::message::Message;

pub(crate) fn encode(message: &Message, _config: &CodecConfig) -> Result<Vec<u8>> {
    let Message::Array(array) = message else {
        return Err(CodecError::UnsupportedType(
            "numeric array codec needs an array".into(),
        ));
    };
    let ndim = u8::try_from(array.ndim()).map_err(|_| {
        CodecError::UnsupportedType(format!("{} dimensions is too many", array.ndim()))
    })?;

    let mut out = Vec::with_capacity(2 + 4 * array.ndim() + array.data().len());
    out.put_u8(array.dtype().tag());
    out.put_u8(ndim);
    for &extent in array.shape() {
        let extent = u32::try_from(extent).map_err(|_| {
            CodecError::UnsupportedType(format!("extent {extent} exceeds u32"))
        })?;
        out.put_u32_le(extent);
    }
    out.extend_from_slice(array.data());
    Ok(out)
}

pub(crate) fn decode(payload: &[u8]) -> Result<Message> {
    let mut buf = payload;
    need(buf, 2)?;
    let dtype = DType::from_tag(buf.get_u8())?;
    let ndim = buf.get_u8() as usize;

    need(buf, 4 * ndim)?;
    let shape = (0..ndim)
        .map(|_| buf.get_u32_le() as usize)
        .collect::<Vec<_>>();

    let expected = byte_len(dtype, &shape)?;
    if buf.len() != expected {
        return Err(CodecError::ShapeMismatch {
            shape,
            dtype: dtype.name(),
            expected,
            actual: buf.len(),
        });
    }
    NdArray::new(dtype, shape, buf.to_vec()).map(Message::Array)
}

pub(crate) fn need(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(array: NdArray) {
        let message = Message::Array(array);
        let bytes = encode(&message, &CodecConfig::default()).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn exact_roundtrip_across_dtypes() {
        roundtrip(NdArray::from_vec(vec![2, 3], vec![1u8, 2, 3, 4, 5, 255]).unwrap());
        roundtrip(NdArray::from_vec(vec![4], vec![i64::MIN, -1, 0, i64::MAX]).unwrap());
        roundtrip(NdArray::from_vec(vec![2, 1, 2], vec![0.1f64, -0.2, 1e300, f64::MIN_POSITIVE]).unwrap());
        roundtrip(NdArray::from_vec(vec![3], vec![f32::NAN.to_bits(), 0, u32::MAX]).unwrap());
    }

    #[test]
    fn scalar_and_empty_shapes() {
        roundtrip(NdArray::from_vec(vec![], vec![42i32]).unwrap());
        roundtrip(NdArray::from_vec::<f32>(vec![0, 3], vec![]).unwrap());
    }

    #[test]
    fn header_layout() {
        let array = NdArray::from_vec(vec![2], vec![1u16, 2]).unwrap();
        let bytes = encode(&Message::Array(array), &CodecConfig::default()).unwrap();
        assert_eq!(bytes, [DType::U16.tag(), 1, 2, 0, 0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn truncated_header() {
        assert!(matches!(decode(&[0]), Err(CodecError::Truncated { .. })));
        assert!(matches!(
            decode(&[DType::U8.tag(), 2, 1, 0]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn data_length_must_match_shape() {
        let mut bytes = vec![DType::F32.tag(), 1];
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::ShapeMismatch {
                expected: 16,
                actual: 12,
                ..
            })
        ));
    }

    #[test]
    fn structured_input_rejected() {
        let message = Message::Structured(crate::value::Value::Nil);
        assert!(encode(&message, &CodecConfig::default()).is_err());
    }
}
