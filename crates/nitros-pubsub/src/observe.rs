//! Per-message observability hooks.

use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;

use nitros_frame::{Kind, Topic};
use tracing::info;

/// Target used by [`TracingSink`]; filter with `RUST_LOG=nitros::events=info`.
pub const EVENT_TARGET: &str = "nitros::events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A message was queued to subscribers.
    Sent,
    /// A message was decoded and handed to the callback.
    Received,
    /// A frame or message was discarded by an overflow policy.
    Dropped,
    /// A payload failed to decode and was skipped.
    DecodeFailed,
    Connected,
    Disconnected,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Sent => "sent",
            EventKind::Received => "received",
            EventKind::Dropped => "dropped",
            EventKind::DecodeFailed => "decode_failed",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: Topic,
    pub timestamp: SystemTime,
    pub event: EventKind,
    pub kind: Option<Kind>,
    /// Encoded payload size.
    pub bytes: usize,
    pub peer: Option<SocketAddr>,
    pub seq: Option<u64>,
}

impl TopicEvent {
    pub fn new(topic: &Topic, event: EventKind) -> Self {
        Self {
            topic: topic.clone(),
            timestamp: SystemTime::now(),
            event,
            kind: None,
            bytes: 0,
            peer: None,
            seq: None,
        }
    }

    pub fn with_payload(mut self, kind: Kind, bytes: usize) -> Self {
        self.kind = Some(kind);
        self.bytes = bytes;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Receives publisher and subscriber events. Called inline on the I/O
/// path, so implementations must be quick.
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: &TopicEvent);
}

/// Logs each event at `info` under [`EVENT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &TopicEvent) {
        info!(
            target: EVENT_TARGET,
            topic = %event.topic,
            event = %event.event,
            kind = event.kind.map(Kind::name),
            bytes = event.bytes,
            peer = event.peer.map(tracing::field::display),
            seq = event.seq,
        );
    }
}

pub(crate) fn emit(sink: &Option<std::sync::Arc<dyn EventSink>>, event: impl FnOnce() -> TopicEvent) {
    if let Some(sink) = sink {
        sink.on_event(&event());
    }
}
