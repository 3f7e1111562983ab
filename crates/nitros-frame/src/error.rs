/// Errors that can occur during frame encoding/decoding.
///
/// Any of these on a live stream means the stream can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4e54 \"NT\")")]
    InvalidMagic,

    /// The kind tag is not one of the known values.
    #[error("unknown kind tag {0}")]
    UnknownKind(u8),

    /// The topic field is empty, too long, or not printable ASCII.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
