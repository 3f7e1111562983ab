use std::time::Duration;

use nitros_frame::ProtocolError;
use nitros_transport::TransportError;

/// Errors surfaced by the discovery registry.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// No publisher for the topic was found before the timeout.
    #[error("no publisher for topic '{topic}' within {timeout:?}")]
    NotFound { topic: String, timeout: Duration },

    /// The registry is running without a multicast socket and the topic is
    /// not advertised in this process.
    #[error("multicast discovery unavailable: {0}")]
    MulticastUnavailable(String),

    /// A registry needs a tokio runtime for its background tasks.
    #[error("discovery registry must be started inside a tokio runtime")]
    NoRuntime,

    /// The registry has shut down.
    #[error("discovery registry closed")]
    Closed,

    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed discovery datagram: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
