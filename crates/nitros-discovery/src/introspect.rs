use std::fmt;
use std::net::SocketAddr;

use nitros_codec::Compression;
use nitros_frame::Kind;
use nitros_transport::Endpoint;
use serde::Serialize;

use crate::cache::Registration;

/// Read-only view of a topic's current registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicInfo {
    pub topic: String,
    pub endpoint: Endpoint,
    pub compression: Compression,
    /// Kind of the last message the publisher sent, if any.
    pub kind: Option<Kind>,
    /// Subscribers connected to the publisher.
    pub connections: usize,
    pub rate_hz: Option<f64>,
    /// Registration time in milliseconds since the Unix epoch.
    pub registered_ms: u64,
    /// Advertised by this process.
    pub local: bool,
}

impl From<&Registration> for TopicInfo {
    fn from(r: &Registration) -> Self {
        Self {
            topic: r.topic.to_string(),
            endpoint: r.endpoint,
            compression: r.compression,
            kind: r.metrics.kind,
            connections: r.metrics.connections,
            rate_hz: r.metrics.rate_hz,
            registered_ms: r.timestamp_ms,
            local: r.local,
        }
    }
}

/// How the registry reaches other processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Joined the multicast group.
    Multicast { group: SocketAddr },
    /// Only advertisements made in this process are visible.
    LocalOnly { reason: String },
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMode::Multicast { group } => write!(f, "multicast {group}"),
            DiscoveryMode::LocalOnly { reason } => write!(f, "local-only ({reason})"),
        }
    }
}

/// Registry health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub mode: DiscoveryMode,
    pub local_registrations: usize,
    pub remote_registrations: usize,
}
