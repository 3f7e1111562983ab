use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use nitros_codec::{CodecConfig, CodecError, Compression, Message};
use nitros_discovery::{DiscoveryRegistry, TopicMetrics};
use nitros_frame::{Kind, Topic};
use nitros_transport::Endpoint;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionSet;
use crate::error::Result;
use crate::listener::{self, ListenerContext};
use crate::observe::{emit, EventKind, EventSink, TopicEvent};
use crate::options::PublisherOptions;
use crate::rate::RateWindow;

/// Extra time `close` allows beyond the drain timeout for tasks to exit.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

const NO_KIND: u8 = u8::MAX;

#[derive(Debug)]
struct PublisherStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    last_kind: AtomicU8,
    rate: Mutex<RateWindow>,
}

impl Default for PublisherStats {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_kind: AtomicU8::new(NO_KIND),
            rate: Mutex::new(RateWindow::default()),
        }
    }
}

impl PublisherStats {
    fn record(&self, kind: Kind) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.last_kind.store(kind.tag(), Ordering::Relaxed);
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(Instant::now());
    }

    fn last_kind(&self) -> Option<Kind> {
        Kind::from_tag(self.last_kind.load(Ordering::Relaxed)).ok()
    }

    fn rate(&self) -> Option<f64> {
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate(Instant::now())
    }
}

/// Serves one topic to any number of subscribers.
///
/// Binds a TCP listener, advertises it in the registry and fans each sent
/// message out to every connected subscriber. `send` never blocks: each
/// subscriber has a bounded queue, and a slow subscriber loses its oldest
/// frames instead of stalling the publisher or its peers.
pub struct Publisher {
    topic: Topic,
    endpoint: Endpoint,
    registry: DiscoveryRegistry,
    compression: Compression,
    codec: CodecConfig,
    max_payload: usize,
    drain_timeout: Duration,
    connections: Arc<ConnectionSet>,
    stats: Arc<PublisherStats>,
    sink: Option<Arc<dyn EventSink>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    withdrawn: bool,
}

impl Publisher {
    /// Bind, start accepting subscribers and advertise `topic`.
    pub async fn new(
        registry: &DiscoveryRegistry,
        topic: &str,
        options: PublisherOptions,
    ) -> Result<Self> {
        let topic = Topic::new(topic)?;
        let (listener, endpoint) =
            nitros_transport::bind_listener(options.host, options.port, options.advertise_host)
                .await?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let connections = Arc::new(ConnectionSet::default());
        let stats = Arc::new(PublisherStats::default());
        let sink = options.sink();

        let ctx = Arc::new(ListenerContext {
            topic: topic.clone(),
            connections: Arc::clone(&connections),
            options: options.clone(),
            sink: sink.clone(),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        });
        tracker.spawn(listener::accept_loop(listener, ctx));
        tracker.spawn(metrics_loop(
            registry.clone(),
            topic.clone(),
            endpoint,
            Arc::clone(&connections),
            Arc::clone(&stats),
            options.metrics_interval,
            cancel.clone(),
        ));

        registry.advertise(&topic, endpoint, options.compression);
        info!(%topic, %endpoint, compression = %options.compression, "publisher started");

        Ok(Self {
            topic,
            endpoint,
            registry: registry.clone(),
            compression: options.compression,
            codec: options.codec,
            max_payload: options.max_payload,
            drain_timeout: options.drain_timeout,
            connections,
            stats,
            sink,
            cancel,
            tracker,
            withdrawn: false,
        })
    }

    /// Encode `message` once and queue it to every connected subscriber.
    ///
    /// Returns how many subscribers it was queued to; `Ok(0)` when nobody
    /// is listening. Fails only when the message cannot be encoded.
    pub fn send(&self, message: impl Into<Message>) -> std::result::Result<usize, CodecError> {
        let message = message.into();
        let (kind, payload) = nitros_codec::encode(&message, self.compression, &self.codec)?;
        if payload.len() > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        let payload = Bytes::from(payload);
        self.stats.record(kind);

        let mut queued = 0;
        for conn in self.connections.established() {
            let (outcome, seq) = conn.enqueue(&self.topic, kind, &payload);
            if outcome.accepted() {
                queued += 1;
            }
            if outcome.lost() {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(topic = %self.topic, peer = %conn.peer(), seq, "subscriber queue full; frame dropped");
                emit(&self.sink, || {
                    TopicEvent::new(&self.topic, EventKind::Dropped)
                        .with_payload(kind, payload.len())
                        .with_peer(conn.peer())
                        .with_seq(seq)
                });
            }
        }

        emit(&self.sink, || {
            TopicEvent::new(&self.topic, EventKind::Sent).with_payload(kind, payload.len())
        });
        Ok(queued)
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The address advertised to subscribers.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn subscriber_count(&self) -> usize {
        self.connections.len()
    }

    /// Wait until at least `count` subscribers are connected. Returns
    /// `false` on timeout.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.connections.subscribe_count();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Messages passed to `send` so far.
    pub fn sent(&self) -> u64 {
        self.stats.sent.load(Ordering::Relaxed)
    }

    /// Frames lost to full subscriber queues.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Send rate over the last few seconds.
    pub fn rate(&self) -> Option<f64> {
        self.stats.rate()
    }

    /// Withdraw the advertisement, flush queued frames (bounded by the drain
    /// timeout) and disconnect every subscriber.
    pub async fn close(mut self) {
        self.shutdown();
        self.tracker.close();
        let grace = self.drain_timeout + CLOSE_GRACE;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(topic = %self.topic, ?grace, "publisher tasks did not stop in time");
        }
        info!(topic = %self.topic, sent = self.sent(), dropped = self.dropped(), "publisher closed");
    }

    fn shutdown(&mut self) {
        if !self.withdrawn {
            self.withdrawn = true;
            self.registry.withdraw(&self.topic, self.endpoint);
        }
        self.cancel.cancel();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("endpoint", &self.endpoint)
            .field("compression", &self.compression)
            .field("subscribers", &self.subscriber_count())
            .field("sent", &self.sent())
            .finish_non_exhaustive()
    }
}

/// Push live statistics into the registry so `nitros list`/`info` and
/// remote processes can see them.
async fn metrics_loop(
    registry: DiscoveryRegistry,
    topic: Topic,
    endpoint: Endpoint,
    connections: Arc<ConnectionSet>,
    stats: Arc<PublisherStats>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let metrics = TopicMetrics {
                    connections: connections.len(),
                    rate_hz: stats.rate(),
                    kind: stats.last_kind(),
                };
                registry.update_metrics(&topic, endpoint, metrics);
            }
        }
    }
    debug!(%topic, "metrics loop stopped");
}
