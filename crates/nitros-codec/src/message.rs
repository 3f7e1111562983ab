use std::fmt;
use std::str::FromStr;

use nitros_frame::Kind;
use serde::{Deserialize, Serialize};

use crate::array::NdArray;
use crate::error::CodecError;
use crate::value::Value;

/// Compression mode a publisher applies to numeric arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Image,
    PointCloud,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Image => "image",
            Compression::PointCloud => "pointcloud",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "image" | "jpeg" => Ok(Compression::Image),
            "pointcloud" | "point_cloud" => Ok(Compression::PointCloud),
            other => Err(CodecError::UnsupportedType(format!(
                "unknown compression '{other}'"
            ))),
        }
    }
}

/// A value handed to `send` or delivered to a subscriber callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Structured(Value),
    Array(NdArray),
}

impl Message {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Message::Structured(value) => Some(value),
            Message::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Message::Array(array) => Some(array),
            Message::Structured(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Message::Structured(value) => Some(value),
            Message::Array(_) => None,
        }
    }

    pub fn into_array(self) -> Option<NdArray> {
        match self {
            Message::Array(array) => Some(array),
            Message::Structured(_) => None,
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Structured(value)
    }
}

impl From<NdArray> for Message {
    fn from(array: NdArray) -> Self {
        Message::Array(array)
    }
}

/// Pick the wire kind for a message. First match wins:
///
/// 1. `(H, W, C)` array with `C` in {1, 3, 4} under `Image` compression
/// 2. `(N, D)` array with `D >= 3` under `PointCloud` compression
/// 3. any array under no compression
/// 4. everything else is `Structured`
pub fn infer_kind(message: &Message, compression: Compression) -> Kind {
    let Message::Array(array) = message else {
        return Kind::Structured;
    };
    match (compression, array.shape()) {
        (Compression::Image, &[_, _, 1 | 3 | 4]) => Kind::Image,
        (Compression::PointCloud, &[_, d]) if d >= 3 => Kind::PointCloud,
        (Compression::None, _) => Kind::NumericArray,
        _ => Kind::Structured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;

    fn array(shape: &[usize]) -> Message {
        let len: usize = shape.iter().product();
        NdArray::new(DType::U8, shape.to_vec(), vec![0u8; len])
            .unwrap()
            .into()
    }

    #[test]
    fn structured_always_structured() {
        let msg: Message = Value::map([("temperature", Value::from(23.5))]).into();
        for compression in [Compression::None, Compression::Image, Compression::PointCloud] {
            assert_eq!(infer_kind(&msg, compression), Kind::Structured);
        }
    }

    #[test]
    fn image_needs_hwc_shape() {
        assert_eq!(infer_kind(&array(&[4, 4, 3]), Compression::Image), Kind::Image);
        assert_eq!(infer_kind(&array(&[4, 4, 1]), Compression::Image), Kind::Image);
        assert_eq!(infer_kind(&array(&[4, 4, 4]), Compression::Image), Kind::Image);
        assert_eq!(infer_kind(&array(&[4, 4, 2]), Compression::Image), Kind::Structured);
        assert_eq!(infer_kind(&array(&[4, 4]), Compression::Image), Kind::Structured);
    }

    #[test]
    fn pointcloud_needs_n_by_3_or_more() {
        assert_eq!(
            infer_kind(&array(&[10, 3]), Compression::PointCloud),
            Kind::PointCloud
        );
        assert_eq!(
            infer_kind(&array(&[10, 6]), Compression::PointCloud),
            Kind::PointCloud
        );
        assert_eq!(
            infer_kind(&array(&[10, 2]), Compression::PointCloud),
            Kind::Structured
        );
    }

    #[test]
    fn uncompressed_arrays_are_numeric() {
        assert_eq!(infer_kind(&array(&[4, 4, 3]), Compression::None), Kind::NumericArray);
        assert_eq!(infer_kind(&array(&[]), Compression::None), Kind::NumericArray);
    }

    #[test]
    fn compression_parses() {
        assert_eq!("pointcloud".parse::<Compression>().unwrap(), Compression::PointCloud);
        assert_eq!("IMAGE".parse::<Compression>().unwrap(), Compression::Image);
        assert!("gzip".parse::<Compression>().is_err());
        assert_eq!(Compression::PointCloud.to_string(), "pointcloud");
    }
}
