use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nitros_codec::Message;
use nitros_discovery::DiscoveryRegistry;
use nitros_frame::Topic;
use nitros_transport::Endpoint;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::connection::ConnectionState;
use crate::connector::{self, SubscriberContext, SubscriberShared};
use crate::error::{PubSubError, ReceiveError, Result};
use crate::options::SubscriberOptions;
use crate::queue::{BoundedQueue, OverflowPolicy};

/// Receives every message published on one topic.
///
/// A background task resolves the topic through the registry, connects to
/// the publisher and reconnects with exponential backoff whenever the
/// connection drops. Decoded messages are handed to the callback on a
/// dedicated thread, in order. Messages published while disconnected are
/// not replayed.
///
/// ```no_run
/// # async fn demo() -> nitros_pubsub::Result<()> {
/// use nitros_pubsub::{DiscoveryRegistry, Subscriber, SubscriberOptions};
///
/// let registry = DiscoveryRegistry::shared()?;
/// let sub = Subscriber::new(
///     &registry,
///     "sensors",
///     |msg| println!("{msg:?}"),
///     SubscriberOptions::default(),
/// )?;
/// // ...
/// sub.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Subscriber {
    shared: Arc<SubscriberShared>,
    delivery: Arc<BoundedQueue<Message>>,
    errors: broadcast::Sender<ReceiveError>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Subscriber {
    /// Start subscribing to `topic`. Returns immediately; the connection is
    /// made in the background. Must be called within a tokio runtime.
    pub fn new<F>(
        registry: &DiscoveryRegistry,
        topic: &str,
        callback: F,
        options: SubscriberOptions,
    ) -> Result<Self>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let topic = Topic::new(topic)?;
        let handle = Handle::try_current().map_err(|_| PubSubError::NoRuntime)?;

        let delivery = Arc::new(BoundedQueue::new(
            options.delivery_capacity,
            OverflowPolicy::DropOldest,
        ));
        let thread = spawn_delivery(
            handle.clone(),
            topic.clone(),
            Arc::clone(&delivery),
            callback,
        )?;

        let shared = Arc::new(SubscriberShared::new(topic.clone()));
        let (errors, _) = broadcast::channel(options.error_capacity.max(1));
        let cancel = CancellationToken::new();
        let ctx = SubscriberContext {
            shared: Arc::clone(&shared),
            registry: registry.clone(),
            sink: options.sink(),
            options,
            delivery: Arc::clone(&delivery),
            errors: errors.clone(),
            cancel: cancel.clone(),
        };
        let task = handle.spawn(connector::run(ctx));
        debug!(%topic, "subscriber started");

        Ok(Self {
            shared,
            delivery,
            errors,
            cancel,
            task: Some(task),
            thread: Some(thread),
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Publisher endpoint while connected.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared.endpoint()
    }

    /// Wait until the subscriber is connected. Returns `false` on timeout
    /// or if the subscriber stopped.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.subscribe();
        let connected = state.wait_for(|s| {
            matches!(s, ConnectionState::Established | ConnectionState::Closed)
        });
        let established = match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(state)) => *state == ConnectionState::Established,
            _ => false,
        };
        established
    }

    /// Decode failures, protocol errors and disconnects, as they happen.
    pub fn errors(&self) -> broadcast::Receiver<ReceiveError> {
        self.errors.subscribe()
    }

    /// Messages decoded so far.
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// Messages lost to publisher or callback overflow.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.shared.decode_failures.load(Ordering::Relaxed)
    }

    /// Receive rate over the last few seconds.
    pub fn rate(&self) -> Option<f64> {
        self.shared.rate()
    }

    /// Stop reconnecting, close the connection and wait for the callback
    /// thread to finish its current message. Pending messages are
    /// discarded.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.delivery.close();
        let discarded = self.delivery.clear();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            }
        }
        info!(topic = %self.shared.topic, discarded, "subscriber closed");
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.delivery.close();
        self.delivery.clear();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.shared.topic)
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .field("received", &self.received())
            .finish_non_exhaustive()
    }
}

fn spawn_delivery<F>(
    handle: Handle,
    topic: Topic,
    queue: Arc<BoundedQueue<Message>>,
    mut callback: F,
) -> std::io::Result<thread::JoinHandle<()>>
where
    F: FnMut(Message) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("nitros-sub:{topic}"))
        .spawn(move || {
            while let Some(message) = handle.block_on(queue.recv()) {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback(message)));
                if let Err(panic) = delivered {
                    error!(%topic, panic = panic_message(panic.as_ref()), "subscriber callback panicked");
                }
            }
            trace!(%topic, "delivery thread exiting");
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
