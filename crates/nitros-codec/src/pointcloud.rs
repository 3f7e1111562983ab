//! Quantized point cloud codec for `(N, D)` arrays with `D >= 3`.
//!
//! Coordinates are scaled, rounded to `i32` and zstd-compressed. The
//! reconstruction error per coordinate is at most `0.5 / scale`.
//!
//! ```text
//! scale f64 LE | output dtype u8 | rows u32 LE | cols u32 LE | zstd(i32 LE * rows * cols)
//! ```

use bytes::{Buf, BufMut};
use tracing::trace;

use crate::array::{DType, Element, NdArray};
use crate::compress::{deflate, inflate};
use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::message::Message;
use crate::numeric::need;

const HEADER_LEN: usize = 17;

pub(crate) fn encode(message: &Message, config: &CodecConfig) -> Result<Vec<u8>> {
    let array = match message {
        Message::Array(array) => array,
        Message::Structured(_) => {
            return Err(CodecError::UnsupportedType(
                "point cloud codec needs an array".into(),
            ))
        }
    };
    let (rows, cols) = match *array.shape() {
        [n, d] if d >= 3 => (n, d),
        _ => {
            return Err(CodecError::UnsupportedType(format!(
                "point cloud shape {:?} is not (N, D>=3)",
                array.shape()
            )))
        }
    };
    let scale = config.pointcloud_scale;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(CodecError::UnsupportedType(format!(
            "point cloud scale {scale} must be positive"
        )));
    }
    let extent = |v: usize| {
        u32::try_from(v)
            .map_err(|_| CodecError::UnsupportedType(format!("point cloud extent {v} too large")))
    };
    let (rows_u32, cols_u32) = (extent(rows)?, extent(cols)?);

    let mut quantized = Vec::with_capacity(array.len() * 4);
    for value in array.to_f64_vec() {
        quantize(value, scale)?.write_le(&mut quantized);
    }
    let packed = deflate(&quantized, config.zstd_level)?;

    let out_dtype = if array.dtype() == DType::F64 {
        DType::F64
    } else {
        DType::F32
    };

    let mut out = Vec::with_capacity(HEADER_LEN + packed.len());
    out.put_f64_le(scale);
    out.put_u8(out_dtype.tag());
    out.put_u32_le(rows_u32);
    out.put_u32_le(cols_u32);
    out.extend_from_slice(&packed);
    trace!(rows, cols, raw = array.data().len(), encoded = out.len(), "encoded point cloud");
    Ok(out)
}

pub(crate) fn decode(payload: &[u8]) -> Result<Message> {
    let mut buf = payload;
    need(buf, HEADER_LEN)?;
    let scale = buf.get_f64_le();
    let out_dtype = DType::from_tag(buf.get_u8())?;
    let rows = buf.get_u32_le() as usize;
    let cols = buf.get_u32_le() as usize;

    if !scale.is_finite() || scale <= 0.0 {
        return Err(CodecError::Corrupt(format!("point cloud scale {scale}")));
    }
    if !out_dtype.is_float() {
        return Err(CodecError::Corrupt(format!(
            "point cloud output dtype {out_dtype}"
        )));
    }

    let expected = rows
        .checked_mul(cols)
        .and_then(|count| count.checked_mul(4))
        .ok_or_else(|| CodecError::Corrupt("point cloud shape overflows".into()))?;
    let raw = inflate(buf, expected)?;
    if raw.len() != expected {
        return Err(CodecError::ShapeMismatch {
            shape: vec![rows, cols],
            dtype: DType::I32.name(),
            expected,
            actual: raw.len(),
        });
    }

    let values = raw
        .chunks_exact(4)
        .map(|chunk| f64::from(i32::read_le(chunk)) / scale);
    let shape = vec![rows, cols];
    let array = if out_dtype == DType::F64 {
        NdArray::from_vec(shape, values.collect::<Vec<f64>>())?
    } else {
        NdArray::from_vec(shape, values.map(|v| v as f32).collect::<Vec<f32>>())?
    };
    Ok(Message::Array(array))
}

fn quantize(value: f64, scale: f64) -> Result<i32> {
    if !value.is_finite() {
        return Err(CodecError::UnsupportedType(format!(
            "point cloud contains non-finite value {value}"
        )));
    }
    let scaled = (value * scale).round();
    if scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return Err(CodecError::UnsupportedType(format!(
            "point cloud value {value} exceeds quantization range at scale {scale}"
        )));
    }
    Ok(scaled as i32)
}
