use nitros_frame::Kind;

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value cannot be represented by the selected codec.
    #[error("unsupported value: {0}")]
    UnsupportedType(String),

    /// The payload ended before a complete value was read.
    #[error("payload truncated (needed {needed} bytes, had {available})")]
    Truncated { needed: usize, available: usize },

    /// The payload is structurally invalid.
    #[error("corrupt payload: {0}")]
    Corrupt(String),

    /// Array data length does not match its shape and element type.
    #[error("array shape {shape:?} of {dtype} needs {expected} bytes, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        dtype: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The kind has no payload codec (e.g. control frames).
    #[error("no codec for kind {0}")]
    NoCodec(Kind),

    /// Encoded payload exceeds the frame limit.
    #[error("encoded payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// MessagePack encoding failed.
    #[error("structured encode error: {0}")]
    StructuredEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("structured decode error: {0}")]
    StructuredDecode(#[from] rmp_serde::decode::Error),

    /// JPEG encoding or decoding failed.
    #[error("image codec error: {0}")]
    Image(#[from] ::image::ImageError),

    /// Compressor I/O failed.
    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
