//! Subscriber-side session loop: resolve, connect, handshake, receive,
//! and reconnect with exponential backoff when anything fails.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use nitros_codec::Message;
use nitros_discovery::{DiscoveryError, DiscoveryRegistry};
use nitros_frame::{FrameCodec, FrameConfig, Kind, ProtocolError, Topic};
use nitros_transport::Endpoint;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionState;
use crate::error::{ConnectionError, ReceiveError};
use crate::handshake::{self, MAX_HANDSHAKE_PAYLOAD};
use crate::observe::{emit, EventKind, EventSink, TopicEvent};
use crate::options::{BackoffConfig, SubscriberOptions};
use crate::queue::BoundedQueue;
use crate::rate::RateWindow;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial,
            config,
            attempts: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once `max_attempts` failures have accumulated.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let delay = self.current.min(self.config.max);
        let grown = self.current.as_secs_f64() * self.config.multiplier.max(1.0);
        self.current = Duration::from_secs_f64(grown.min(self.config.max.as_secs_f64()));
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.attempts = 0;
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// State shared between a [`Subscriber`](crate::Subscriber) handle and its
/// session task.
#[derive(Debug)]
pub(crate) struct SubscriberShared {
    pub topic: Topic,
    pub state: watch::Sender<ConnectionState>,
    pub endpoint: Mutex<Option<Endpoint>>,
    pub received: AtomicU64,
    pub dropped: AtomicU64,
    pub decode_failures: AtomicU64,
    pub rate: Mutex<RateWindow>,
}

impl SubscriberShared {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            state: watch::Sender::new(ConnectionState::Connecting),
            endpoint: Mutex::new(None),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            rate: Mutex::new(RateWindow::default()),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn set_endpoint(&self, endpoint: Option<Endpoint>) {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = endpoint;
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate(Instant::now())
    }
}

pub(crate) struct SubscriberContext {
    pub shared: Arc<SubscriberShared>,
    pub registry: DiscoveryRegistry,
    pub options: SubscriberOptions,
    pub delivery: Arc<BoundedQueue<Message>>,
    pub errors: broadcast::Sender<ReceiveError>,
    pub sink: Option<Arc<dyn EventSink>>,
    pub cancel: CancellationToken,
}

enum SessionEnd {
    Cancelled,
    Lost {
        established: bool,
        error: ConnectionError,
    },
}

/// Marks the subscriber closed and releases the delivery thread however
/// the session task ends, including runtime shutdown.
struct CloseOnExit<'a>(&'a SubscriberContext);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.shared.set_state(ConnectionState::Closed);
        self.0.shared.set_endpoint(None);
        self.0.delivery.close();
    }
}

pub(crate) async fn run(ctx: SubscriberContext) {
    let _close = CloseOnExit(&ctx);
    let topic = &ctx.shared.topic;
    let mut backoff = Backoff::new(ctx.options.backoff.clone());

    loop {
        let error = match session(&ctx).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Lost { established, error } => {
                if established {
                    backoff.reset();
                }
                error
            }
        };
        ctx.shared.set_state(ConnectionState::Connecting);
        report_lost(&ctx, &error);

        let Some(delay) = backoff.next_delay() else {
            let attempts = backoff.attempts();
            warn!(%topic, attempts, "giving up on topic");
            let _ = ctx.errors.send(ReceiveError::GaveUp { attempts });
            break;
        };
        debug!(%topic, ?delay, attempt = backoff.attempts(), "reconnecting after backoff");
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!(%topic, "subscriber session loop stopped");
}

fn report_lost(ctx: &SubscriberContext, error: &ConnectionError) {
    let topic = &ctx.shared.topic;
    match error {
        ConnectionError::Discovery(DiscoveryError::NotFound { .. }) => {
            debug!(%topic, "no publisher yet");
        }
        ConnectionError::Closed => info!(%topic, "publisher went away"),
        other => warn!(%topic, error = %other, "connection lost"),
    }
    let _ = ctx
        .errors
        .send(ReceiveError::Disconnected(error.to_string()));
}

async fn session(ctx: &SubscriberContext) -> SessionEnd {
    let topic = &ctx.shared.topic;
    let options = &ctx.options;
    let lost = |error: ConnectionError| SessionEnd::Lost {
        established: false,
        error,
    };
    ctx.shared.set_state(ConnectionState::Connecting);

    let endpoint = tokio::select! {
        () = ctx.cancel.cancelled() => return SessionEnd::Cancelled,
        resolved = ctx.registry.resolve(topic, options.resolve_timeout) => match resolved {
            Ok(endpoint) => endpoint,
            Err(err) => return lost(err.into()),
        }
    };

    let connect = tokio::time::timeout(
        options.connect_timeout,
        nitros_transport::connect(endpoint),
    );
    let stream = tokio::select! {
        () = ctx.cancel.cancelled() => return SessionEnd::Cancelled,
        connected = connect => match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                ctx.registry.invalidate(topic, endpoint);
                return lost(err.into());
            }
            Err(_) => {
                ctx.registry.invalidate(topic, endpoint);
                return lost(ConnectionError::Timeout("connect", options.connect_timeout));
            }
        }
    };

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        FrameCodec::new(FrameConfig {
            max_payload_size: options.max_payload,
        }),
    );
    let mut writer = FramedWrite::new(
        write_half,
        FrameCodec::new(FrameConfig {
            max_payload_size: MAX_HANDSHAKE_PAYLOAD,
        }),
    );

    let handshake = tokio::time::timeout(
        options.handshake_timeout,
        handshake::subscribe(&mut reader, &mut writer, topic),
    );
    tokio::select! {
        () = ctx.cancel.cancelled() => return SessionEnd::Cancelled,
        result = handshake => match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                if matches!(err, ConnectionError::Handshake(_)) {
                    ctx.registry.invalidate(topic, endpoint);
                }
                return lost(err);
            }
            Err(_) => return lost(ConnectionError::Timeout("handshake", options.handshake_timeout)),
        }
    }

    let peer = endpoint.socket_addr();
    ctx.shared.set_endpoint(Some(endpoint));
    ctx.shared.set_state(ConnectionState::Established);
    info!(%topic, %endpoint, "subscribed");
    emit(&ctx.sink, || {
        TopicEvent::new(topic, EventKind::Connected).with_peer(peer)
    });

    let outcome = receive(ctx, &mut reader, peer).await;

    ctx.shared.set_endpoint(None);
    emit(&ctx.sink, || {
        TopicEvent::new(topic, EventKind::Disconnected).with_peer(peer)
    });
    match outcome {
        None => SessionEnd::Cancelled,
        Some(error) => SessionEnd::Lost {
            established: true,
            error,
        },
    }
}

/// Read frames until the connection fails. `None` means cancelled.
async fn receive<R>(
    ctx: &SubscriberContext,
    reader: &mut FramedRead<R, FrameCodec>,
    peer: SocketAddr,
) -> Option<ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let topic = &ctx.shared.topic;
    let max_failures = ctx.options.max_decode_failures;
    let mut last_seq: Option<u64> = None;
    let mut failures: u32 = 0;

    loop {
        let next = tokio::select! {
            () = ctx.cancel.cancelled() => return None,
            next = reader.next() => next,
        };
        let frame = match next {
            None | Some(Err(ProtocolError::ConnectionClosed)) => {
                return Some(ConnectionError::Closed)
            }
            Some(Err(err)) => {
                let _ = ctx.errors.send(ReceiveError::Protocol(err.to_string()));
                return Some(err.into());
            }
            Some(Ok(frame)) => frame,
        };

        if frame.kind == Kind::Control {
            trace!(%topic, "ignoring control frame");
            continue;
        }
        if frame.topic != *topic {
            let msg = format!("frame for '{}' on a '{topic}' connection", frame.topic);
            let _ = ctx.errors.send(ReceiveError::Protocol(msg.clone()));
            return Some(ConnectionError::UnexpectedFrame(msg));
        }

        if let Some(prev) = last_seq {
            let gap = frame.seq.saturating_sub(prev.saturating_add(1));
            if gap > 0 {
                ctx.shared.dropped.fetch_add(gap, Ordering::Relaxed);
                debug!(%topic, gap, seq = frame.seq, "publisher dropped frames");
                emit(&ctx.sink, || {
                    TopicEvent::new(topic, EventKind::Dropped)
                        .with_peer(peer)
                        .with_seq(frame.seq)
                });
            }
        }
        last_seq = Some(frame.seq);

        match nitros_codec::decode(frame.kind, &frame.payload) {
            Ok(message) => {
                failures = 0;
                ctx.shared.received.fetch_add(1, Ordering::Relaxed);
                ctx.shared
                    .rate
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(Instant::now());
                emit(&ctx.sink, || {
                    TopicEvent::new(topic, EventKind::Received)
                        .with_payload(frame.kind, frame.payload.len())
                        .with_peer(peer)
                        .with_seq(frame.seq)
                });
                if ctx.delivery.push(message).lost() {
                    ctx.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(%topic, "callback behind; dropped oldest pending message");
                    emit(&ctx.sink, || {
                        TopicEvent::new(topic, EventKind::Dropped).with_seq(frame.seq)
                    });
                }
            }
            Err(err) => {
                failures += 1;
                ctx.shared.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%topic, seq = frame.seq, kind = %frame.kind, error = %err, "skipping undecodable payload");
                let _ = ctx.errors.send(ReceiveError::Decode {
                    seq: frame.seq,
                    kind: frame.kind,
                    reason: err.to_string(),
                });
                emit(&ctx.sink, || {
                    TopicEvent::new(topic, EventKind::DecodeFailed)
                        .with_payload(frame.kind, frame.payload.len())
                        .with_peer(peer)
                        .with_seq(frame.seq)
                });
                if failures > max_failures {
                    return Some(ConnectionError::DecodeStorm(failures));
                }
            }
        }
    }
}
