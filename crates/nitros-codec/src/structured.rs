//! MessagePack codec for structured values.
//!
//! Arrays that reach this path (an incompatible compression mode, for
//! instance) are carried as a tagged map and rebuilt on decode.
//!
//! The key `__ndarray` is reserved: any decoded map holding
//! `"__ndarray": true` is treated as a tagged array and must carry
//! `dtype`, `shape` and `data`, otherwise decoding fails with
//! [`CodecError::Corrupt`].

use crate::array::{DType, NdArray};
use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::message::Message;
use crate::value::Value;

/// Reserved map key marking a tagged array.
pub const NDARRAY_TAG: &str = "__ndarray";

pub(crate) fn encode(message: &Message, _config: &CodecConfig) -> Result<Vec<u8>> {
    let bytes = match message {
        Message::Structured(value) => rmp_serde::to_vec(value)?,
        Message::Array(array) => rmp_serde::to_vec(&array_to_value(array))?,
    };
    Ok(bytes)
}

pub(crate) fn decode(payload: &[u8]) -> Result<Message> {
    let value: Value = rmp_serde::from_slice(payload)?;
    if value.get(NDARRAY_TAG).and_then(Value::as_bool) == Some(true) {
        return value_to_array(&value).map(Message::Array);
    }
    Ok(Message::Structured(value))
}

fn array_to_value(array: &NdArray) -> Value {
    let shape = array
        .shape()
        .iter()
        .map(|&extent| Value::from(extent as u64))
        .collect::<Vec<_>>();
    Value::map([
        (NDARRAY_TAG, Value::Bool(true)),
        ("dtype", Value::from(array.dtype().name())),
        ("shape", Value::Array(shape)),
        ("data", Value::Bytes(array.data().to_vec())),
    ])
}

fn value_to_array(value: &Value) -> Result<NdArray> {
    let field = |name: &str| {
        value
            .get(name)
            .ok_or_else(|| CodecError::Corrupt(format!("tagged array missing '{name}'")))
    };

    let dtype: DType = field("dtype")?
        .as_str()
        .ok_or_else(|| CodecError::Corrupt("array dtype is not a string".into()))?
        .parse()?;

    let Value::Array(extents) = field("shape")? else {
        return Err(CodecError::Corrupt("array shape is not a sequence".into()));
    };
    let shape = extents
        .iter()
        .map(|extent| {
            extent
                .as_i64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| CodecError::Corrupt(format!("bad array extent {extent:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let Value::Bytes(data) = field("data")? else {
        return Err(CodecError::Corrupt("array data is not a byte blob".into()));
    };
    NdArray::new(dtype, shape, data.clone())
}
