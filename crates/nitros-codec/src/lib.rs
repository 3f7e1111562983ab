//! Type-aware payload codecs.
//!
//! A [`Message`] is either a structured [`Value`] or a numeric [`NdArray`].
//! [`encode`] infers the [`Kind`] from the message shape and the requested
//! [`Compression`], then runs the matching codec:
//!
//! | Kind           | Encoding                                   | Round trip |
//! |----------------|--------------------------------------------|------------|
//! | `Structured`   | MessagePack                                | exact      |
//! | `NumericArray` | dtype/shape header + raw little-endian     | exact      |
//! | `Image`        | JPEG (alpha plane zstd-compressed)         | lossy      |
//! | `PointCloud`   | fixed-point quantization + zstd            | bounded    |

pub mod array;
pub mod compress;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod message;
pub mod numeric;
pub mod pointcloud;
pub mod structured;
pub mod value;

pub use array::{DType, Element, NdArray};
pub use config::{CodecConfig, DEFAULT_IMAGE_QUALITY, DEFAULT_POINTCLOUD_SCALE};
pub use dispatch::{decode, encode, encode_as};
pub use error::{CodecError, Result};
pub use message::{infer_kind, Compression, Message};
pub use nitros_frame::Kind;
pub use value::Value;
