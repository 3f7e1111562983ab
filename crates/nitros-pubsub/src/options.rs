use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use nitros_codec::{CodecConfig, Compression};
use nitros_frame::DEFAULT_MAX_PAYLOAD;

use crate::observe::{EventSink, TracingSink};
use crate::queue::OverflowPolicy;

/// Default per-subscriber send queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default cap on concurrent subscribers per publisher.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 64;

/// Default time allowed for the subscription handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publisher configuration.
#[derive(Clone)]
pub struct PublisherOptions {
    /// Codec selection hint for array payloads.
    pub compression: Compression,
    /// Emit per-message events through `tracing`.
    pub log: bool,
    /// Interface to listen on. Default: all interfaces.
    pub host: IpAddr,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    /// Address to advertise instead of the detected local address.
    pub advertise_host: Option<IpAddr>,
    /// Frames buffered per subscriber before the overflow policy applies.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub max_subscribers: usize,
    /// How long `close` waits for queued frames to flush.
    pub drain_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Largest encoded payload `send` will accept.
    pub max_payload: usize,
    pub codec: CodecConfig,
    /// How often live metrics are pushed into the registry.
    pub metrics_interval: Duration,
    /// Receives an event for every send, drop and connection change.
    pub event_sink: Option<Arc<dyn EventSink>>,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            log: false,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise_host: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            drain_timeout: Duration::from_secs(1),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            codec: CodecConfig::default(),
            metrics_interval: Duration::from_secs(1),
            event_sink: None,
        }
    }
}

impl PublisherOptions {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    /// Listen on `host:port`.
    pub fn with_bind(mut self, host: IpAddr, port: u16) -> Self {
        self.host = host;
        self.port = port;
        self
    }

    pub fn with_advertise_host(mut self, host: IpAddr) -> Self {
        self.advertise_host = Some(host);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn EventSink>> {
        resolve_sink(&self.event_sink, self.log)
    }
}

impl fmt::Debug for PublisherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherOptions")
            .field("compression", &self.compression)
            .field("log", &self.log)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("advertise_host", &self.advertise_host)
            .field("queue_capacity", &self.queue_capacity)
            .field("overflow", &self.overflow)
            .field("max_subscribers", &self.max_subscribers)
            .field("drain_timeout", &self.drain_timeout)
            .field("max_payload", &self.max_payload)
            .field("event_sink", &self.event_sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Exponential reconnect backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    /// Stop after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(32),
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Constant delay, useful in tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Subscriber configuration.
#[derive(Clone)]
pub struct SubscriberOptions {
    /// Emit per-message events through `tracing`.
    pub log: bool,
    pub backoff: BackoffConfig,
    /// How long one attempt waits for the topic to appear in the registry.
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Largest frame payload accepted from the publisher.
    pub max_payload: usize,
    /// Consecutive undecodable payloads tolerated before reconnecting.
    pub max_decode_failures: u32,
    /// Decoded messages buffered ahead of the callback. Oldest are dropped
    /// when the callback falls behind.
    pub delivery_capacity: usize,
    /// Depth of the error broadcast channel.
    pub error_capacity: usize,
    pub event_sink: Option<Arc<dyn EventSink>>,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            log: false,
            backoff: BackoffConfig::default(),
            resolve_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_decode_failures: 8,
            delivery_capacity: 64,
            error_capacity: 64,
            event_sink: None,
        }
    }
}

impl SubscriberOptions {
    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    pub fn with_max_decode_failures(mut self, max: u32) -> Self {
        self.max_decode_failures = max;
        self
    }

    pub fn with_delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn EventSink>> {
        resolve_sink(&self.event_sink, self.log)
    }
}

impl fmt::Debug for SubscriberOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberOptions")
            .field("log", &self.log)
            .field("backoff", &self.backoff)
            .field("resolve_timeout", &self.resolve_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_payload", &self.max_payload)
            .field("max_decode_failures", &self.max_decode_failures)
            .field("delivery_capacity", &self.delivery_capacity)
            .field("event_sink", &self.event_sink.is_some())
            .finish_non_exhaustive()
    }
}

fn resolve_sink(custom: &Option<Arc<dyn EventSink>>, log: bool) -> Option<Arc<dyn EventSink>> {
    match custom {
        Some(sink) => Some(Arc::clone(sink)),
        None if log => Some(Arc::new(TracingSink)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_defaults() {
        let opts = PublisherOptions::default();
        assert_eq!(opts.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(opts.overflow, OverflowPolicy::DropOldest);
        assert_eq!(opts.port, 0);
        assert!(opts.sink().is_none());
    }

    #[test]
    fn log_flag_installs_tracing_sink() {
        assert!(PublisherOptions::default().with_log(true).sink().is_some());
        assert!(SubscriberOptions::default().with_log(true).sink().is_some());
    }

    #[test]
    fn backoff_defaults_double_to_32s() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.initial, Duration::from_secs(1));
        assert_eq!(backoff.multiplier, 2.0);
        assert_eq!(backoff.max, Duration::from_secs(32));
        assert_eq!(backoff.max_attempts, None);
    }

    #[test]
    fn debug_hides_sink() {
        let text = format!("{:?}", SubscriberOptions::default().with_log(true));
        assert!(text.contains("event_sink: false"));
    }
}
