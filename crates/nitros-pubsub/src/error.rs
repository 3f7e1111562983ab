use std::time::Duration;

use nitros_codec::CodecError;
use nitros_discovery::DiscoveryError;
use nitros_frame::{Kind, ProtocolError};
use nitros_transport::TransportError;

/// Errors returned by publisher and subscriber constructors. `Codec` lets a
/// failed `send` propagate with `?` in the same function.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Publishers and subscribers run their I/O on the current tokio runtime.
    #[error("must be created inside a tokio runtime")]
    NoRuntime,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single connection attempt or session ended. Always transient:
/// subscribers retry after backoff.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("publisher rejected subscription: {0}")]
    Rejected(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("peer closed the connection")]
    Closed,

    #[error("{0} consecutive payloads failed to decode")]
    DecodeStorm(u32),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Problems a subscriber reports on its error channel. Cloneable so every
/// receiver of the broadcast gets its own copy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReceiveError {
    /// A frame arrived but its payload could not be decoded; it was skipped.
    #[error("failed to decode {kind} payload (seq {seq}): {reason}")]
    Decode { seq: u64, kind: Kind, reason: String },

    /// The stream was malformed; the connection was dropped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection ended or could not be established; reconnecting.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// `max_attempts` reconnects failed; the subscriber has stopped.
    #[error("gave up after {attempts} attempts")]
    GaveUp { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, PubSubError>;
