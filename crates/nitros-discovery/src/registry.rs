use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use nitros_codec::Compression;
use nitros_frame::Topic;
use nitros_transport::{bind_multicast, Endpoint};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::{Applied, Cache, Registration};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::introspect::{DiscoveryMode, RegistryStatus, TopicInfo};
use crate::wire::{now_ms, Advertisement, Datagram, TopicMetrics, MAX_DATAGRAM};

/// Floor for timer periods; `interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// The process-wide registry, alive while at least one handle exists.
static SHARED: Mutex<Weak<RegistryInner>> = Mutex::new(Weak::new());

/// Topic-to-endpoint discovery over local-network multicast.
///
/// Cloning is cheap; all clones share one cache and one socket. The
/// background tasks stop when the last clone is dropped.
///
/// ```no_run
/// # async fn demo() -> Result<(), nitros_discovery::DiscoveryError> {
/// use std::time::Duration;
/// use nitros_discovery::DiscoveryRegistry;
///
/// let registry = DiscoveryRegistry::shared()?;
/// let topic = nitros_discovery::Topic::new("sensors")?;
/// let endpoint = registry.resolve(&topic, Duration::from_secs(2)).await?;
/// println!("sensors served at {endpoint}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DiscoveryRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    state: Arc<State>,
    socket: Option<Arc<UdpSocket>>,
    group: SocketAddr,
    mode: DiscoveryMode,
    config: DiscoveryConfig,
    cancel: CancellationToken,
}

/// State shared with the background tasks.
#[derive(Default)]
struct State {
    cache: Mutex<Cache>,
    changed: Notify,
}

impl State {
    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiscoveryRegistry {
    /// The process-wide registry, configured from the environment on first use.
    pub fn shared() -> Result<Self> {
        Self::shared_with(DiscoveryConfig::from_env())
    }

    /// The process-wide registry. `config` is only used if no registry is
    /// currently alive.
    pub fn shared_with(config: DiscoveryConfig) -> Result<Self> {
        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(inner) = slot.upgrade() {
            return Ok(Self { inner });
        }
        let registry = Self::start(config)?;
        *slot = Arc::downgrade(&registry.inner);
        Ok(registry)
    }

    /// A standalone registry, independent of the shared one.
    ///
    /// Must be called inside a tokio runtime. If the multicast socket cannot
    /// be created the registry runs local-only and says so in [`status`].
    ///
    /// [`status`]: DiscoveryRegistry::status
    pub fn start(config: DiscoveryConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;
        let multicast = config.multicast_config();
        let group = multicast.group_addr();

        let (socket, mode) = if config.multicast {
            match bind_multicast(&multicast) {
                Ok(socket) => (Some(Arc::new(socket)), DiscoveryMode::Multicast { group }),
                Err(err) => {
                    warn!(error = %err, "multicast discovery unavailable; running local-only");
                    let reason = err.to_string();
                    (None, DiscoveryMode::LocalOnly { reason })
                }
            }
        } else {
            let reason = "multicast disabled by configuration".to_string();
            (None, DiscoveryMode::LocalOnly { reason })
        };

        let state = Arc::new(State::default());
        let cancel = CancellationToken::new();

        handle.spawn(sweep_loop(
            state.clone(),
            config.sweep_interval,
            config.registration_ttl,
            cancel.clone(),
        ));
        if let Some(socket) = &socket {
            handle.spawn(receive_loop(
                state.clone(),
                socket.clone(),
                group,
                cancel.clone(),
            ));
            handle.spawn(refresh_loop(
                state.clone(),
                socket.clone(),
                group,
                config.refresh_interval,
                cancel.clone(),
            ));
        }

        info!(%mode, "discovery registry started");
        Ok(Self {
            inner: Arc::new(RegistryInner {
                state,
                socket,
                group,
                mode,
                config,
                cancel,
            }),
        })
    }

    /// Announce that `topic` is served at `endpoint`.
    ///
    /// The advertisement is re-broadcast every refresh interval until
    /// [`withdraw`](Self::withdraw).
    pub fn advertise(&self, topic: &Topic, endpoint: Endpoint, compression: Compression) {
        let registration = Registration {
            topic: topic.clone(),
            endpoint,
            timestamp_ms: now_ms(),
            compression,
            metrics: TopicMetrics::default(),
            local: true,
        };
        let ad = registration.to_advertisement();
        self.inner.state.cache().advertise_local(registration);
        self.inner.state.changed.notify_waiters();
        debug!(topic = %topic, %endpoint, %compression, "advertised topic");
        self.inner.send(&Datagram::Advertise(ad));
    }

    /// Stop announcing `topic` at `endpoint`.
    pub fn withdraw(&self, topic: &Topic, endpoint: Endpoint) {
        let timestamp_ms = now_ms();
        let existed = self.inner.state.cache().withdraw_local(
            topic,
            endpoint,
            timestamp_ms,
            std::time::Instant::now(),
        );
        if existed {
            debug!(topic = %topic, %endpoint, "withdrew topic");
            self.inner.send(&Datagram::Withdraw {
                topic: topic.clone(),
                endpoint,
                timestamp_ms,
            });
        }
    }

    /// Find the endpoint serving `topic`, waiting up to `timeout`.
    ///
    /// Answers from the cache when possible; otherwise multicasts a query
    /// (repeated every query interval) and waits for an advertisement.
    pub async fn resolve(&self, topic: &Topic, timeout: Duration) -> Result<Endpoint> {
        let state = &self.inner.state;
        let deadline = Instant::now() + timeout;
        let mut next_query = Instant::now();

        loop {
            let notified = state.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(endpoint) = self.lookup(topic) {
                return Ok(endpoint);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DiscoveryError::NotFound {
                    topic: topic.to_string(),
                    timeout,
                });
            }
            if now >= next_query {
                trace!(topic = %topic, "querying for publishers");
                self.inner.send(&Datagram::Query {
                    topic: Some(topic.clone()),
                });
                next_query = now + self.inner.config.query_interval;
            }

            tokio::select! {
                () = notified.as_mut() => {}
                () = tokio::time::sleep_until(next_query.min(deadline)) => {}
                () = self.inner.cancel.cancelled() => return Err(DiscoveryError::Closed),
            }
        }
    }

    /// Cache-only lookup.
    pub fn try_resolve(&self, topic: &Topic) -> Result<Endpoint> {
        if let Some(endpoint) = self.lookup(topic) {
            return Ok(endpoint);
        }
        match &self.inner.mode {
            DiscoveryMode::LocalOnly { reason } => {
                Err(DiscoveryError::MulticastUnavailable(reason.clone()))
            }
            DiscoveryMode::Multicast { .. } => Err(DiscoveryError::NotFound {
                topic: topic.to_string(),
                timeout: Duration::ZERO,
            }),
        }
    }

    /// Drop a remote registration the caller could not use, so the next
    /// resolve asks the network again.
    pub fn invalidate(&self, topic: &Topic, endpoint: Endpoint) -> bool {
        let removed = self.inner.state.cache().invalidate(topic, endpoint);
        if removed {
            debug!(topic = %topic, %endpoint, "invalidated registration");
        }
        removed
    }

    /// Attach live statistics to a local advertisement; carried by the next
    /// refresh broadcast.
    pub fn update_metrics(&self, topic: &Topic, endpoint: Endpoint, metrics: TopicMetrics) {
        if !self
            .inner
            .state
            .cache()
            .update_local_metrics(topic, endpoint, metrics)
        {
            trace!(topic = %topic, %endpoint, "metrics for unknown advertisement ignored");
        }
    }

    /// Every topic with a live registration, local or remote.
    pub fn list_topics(&self) -> BTreeSet<String> {
        self.inner.state.cache().topics()
    }

    /// Send rate reported by the topic's current publisher.
    pub fn topic_rate(&self, topic: &str) -> Option<f64> {
        self.topic_info(topic).and_then(|info| info.rate_hz)
    }

    /// Details of the registration `resolve` would pick.
    pub fn topic_info(&self, topic: &str) -> Option<TopicInfo> {
        let topic = Topic::new(topic).ok()?;
        self.inner.state.cache().lookup(&topic).map(TopicInfo::from)
    }

    /// Ask every publisher to announce itself, wait, then list topics.
    pub async fn scan(&self, wait: Duration) -> BTreeSet<String> {
        self.inner.send(&Datagram::Query { topic: None });
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = self.inner.cancel.cancelled() => {}
        }
        self.list_topics()
    }

    pub fn status(&self) -> RegistryStatus {
        let cache = self.inner.state.cache();
        RegistryStatus {
            mode: self.inner.mode.clone(),
            local_registrations: cache.local_count(),
            remote_registrations: cache.remote_count(),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same registry.
    pub fn same_registry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lookup(&self, topic: &Topic) -> Option<Endpoint> {
        self.inner.state.cache().lookup(topic).map(|r| r.endpoint)
    }
}

impl fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl RegistryInner {
    fn send(&self, datagram: &Datagram) {
        let Some(socket) = &self.socket else {
            return;
        };
        let bytes = match datagram.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode discovery datagram");
                return;
            }
        };
        if let Err(err) = socket.try_send_to(&bytes, self.group) {
            debug!(error = %err, group = %self.group, "discovery send failed");
        }
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let leftovers = self.state.cache().local_advertisements(None);
        for ad in leftovers {
            self.send(&Datagram::Withdraw {
                topic: ad.topic,
                endpoint: ad.endpoint,
                timestamp_ms: now_ms(),
            });
        }
        self.cancel.cancel();
        debug!("discovery registry shut down");
    }
}

async fn receive_loop(
    state: Arc<State>,
    socket: Arc<UdpSocket>,
    group: SocketAddr,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("discovery receiver shutting down");
                break;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => match Datagram::decode(&buf[..len]) {
                    Ok(datagram) => handle_datagram(&state, &socket, group, datagram, from).await,
                    Err(err) => trace!(%from, error = %err, "ignoring malformed datagram"),
                },
                Err(err) => {
                    warn!(error = %err, "discovery receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
}

async fn handle_datagram(
    state: &State,
    socket: &UdpSocket,
    group: SocketAddr,
    datagram: Datagram,
    from: SocketAddr,
) {
    for ad in apply_datagram(state, datagram, from) {
        send_async(socket, group, &Datagram::Reply(ad)).await;
    }
}

/// Fold one received datagram into the cache. Returns the advertisements a
/// query should be answered with.
fn apply_datagram(state: &State, datagram: Datagram, from: SocketAddr) -> Vec<Advertisement> {
    match datagram {
        Datagram::Advertise(ad) | Datagram::Reply(ad) => {
            let (topic, endpoint) = (ad.topic.clone(), ad.endpoint);
            let applied = state
                .cache()
                .apply_remote(ad, std::time::Instant::now());
            match applied {
                Applied::Inserted => {
                    debug!(topic = %topic, %endpoint, %from, "discovered publisher");
                    state.changed.notify_waiters();
                }
                Applied::Refreshed => trace!(topic = %topic, %endpoint, "registration refreshed"),
                Applied::Ignored => {}
            }
            Vec::new()
        }
        Datagram::Withdraw {
            topic,
            endpoint,
            timestamp_ms,
        } => {
            let removed = state.cache().apply_withdraw(
                &topic,
                endpoint,
                timestamp_ms,
                std::time::Instant::now(),
            );
            if removed {
                debug!(topic = %topic, %endpoint, "publisher withdrew");
            }
            Vec::new()
        }
        Datagram::Query { topic } => state.cache().local_advertisements(topic.as_ref()),
    }
}

async fn refresh_loop(
    state: Arc<State>,
    socket: Arc<UdpSocket>,
    group: SocketAddr,
    period: Duration,
    cancel: CancellationToken,
) {
    let period = period.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let ads: Vec<Advertisement> = state.cache().local_advertisements(None);
                for ad in ads {
                    send_async(&socket, group, &Datagram::Advertise(ad)).await;
                }
            }
        }
    }
}

async fn sweep_loop(
    state: Arc<State>,
    period: Duration,
    ttl: Duration,
    cancel: CancellationToken,
) {
    let period = period.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = state.cache().sweep(std::time::Instant::now(), ttl);
                if evicted > 0 {
                    debug!(evicted, "expired stale registrations");
                }
            }
        }
    }
}

async fn send_async(socket: &UdpSocket, group: SocketAddr, datagram: &Datagram) {
    match datagram.encode() {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, group).await {
                debug!(error = %err, %group, "discovery send failed");
            }
        }
        Err(err) => warn!(error = %err, "failed to encode discovery datagram"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn local_registry() -> DiscoveryRegistry {
        DiscoveryRegistry::start(DiscoveryConfig::local_only()).unwrap()
    }

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn start_outside_runtime_fails() {
        let err = DiscoveryRegistry::start(DiscoveryConfig::local_only()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoRuntime));
    }

    #[tokio::test]
    async fn local_advertise_resolves_immediately() {
        let registry = local_registry();
        registry.advertise(&topic("sensors"), endpoint(4000), Compression::None);

        let found = registry
            .resolve(&topic("sensors"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(found, endpoint(4000));
        assert_eq!(registry.try_resolve(&topic("sensors")).unwrap(), endpoint(4000));
        assert_eq!(
            registry.list_topics().into_iter().collect::<Vec<_>>(),
            ["sensors"]
        );
    }

    #[tokio::test]
    async fn resolve_waits_for_late_advertisement() {
        let registry = local_registry();
        let publisher = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            publisher.advertise(&topic("late"), endpoint(4001), Compression::None);
        });

        let found = registry
            .resolve(&topic("late"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, endpoint(4001));
    }

    #[tokio::test]
    async fn resolve_times_out() {
        let registry = local_registry();
        let err = registry
            .resolve(&topic("nobody"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn withdraw_removes_topic() {
        let registry = local_registry();
        registry.advertise(&topic("t"), endpoint(4002), Compression::None);
        registry.withdraw(&topic("t"), endpoint(4002));

        assert!(registry.list_topics().is_empty());
        assert!(matches!(
            registry.try_resolve(&topic("t")),
            Err(DiscoveryError::MulticastUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn metrics_flow_into_topic_info() {
        let registry = local_registry();
        registry.advertise(&topic("cloud"), endpoint(4003), Compression::PointCloud);
        registry.update_metrics(
            &topic("cloud"),
            endpoint(4003),
            TopicMetrics {
                connections: 2,
                rate_hz: Some(9.5),
                kind: Some(nitros_frame::Kind::PointCloud),
            },
        );

        let info = registry.topic_info("cloud").unwrap();
        assert_eq!(info.endpoint, endpoint(4003));
        assert_eq!(info.compression, Compression::PointCloud);
        assert_eq!(info.connections, 2);
        assert!(info.local);
        assert_eq!(registry.topic_rate("cloud"), Some(9.5));
        assert_eq!(registry.topic_rate("missing"), None);
        assert!(registry.topic_info("bad topic").is_none());
    }

    #[tokio::test]
    async fn status_reports_local_only_mode() {
        let registry = local_registry();
        registry.advertise(&topic("a"), endpoint(4004), Compression::None);
        let status = registry.status();
        assert!(matches!(status.mode, DiscoveryMode::LocalOnly { .. }));
        assert_eq!(status.local_registrations, 1);
        assert_eq!(status.remote_registrations, 0);
    }

    #[tokio::test]
    async fn shared_registry_lives_while_handles_exist() {
        let first = DiscoveryRegistry::shared_with(DiscoveryConfig::local_only()).unwrap();
        let second = DiscoveryRegistry::shared_with(DiscoveryConfig::local_only()).unwrap();
        assert!(first.same_registry(&second));

        let weak = Arc::downgrade(&first.inner);
        drop(first);
        drop(second);
        assert!(weak.upgrade().is_none());

        let third = DiscoveryRegistry::shared_with(DiscoveryConfig::local_only()).unwrap();
        assert!(weak.upgrade().is_none());
        assert_eq!(Arc::strong_count(&third.inner), 1);
    }

    fn feed(registry: &DiscoveryRegistry, json: &str) -> Vec<Advertisement> {
        let from: SocketAddr = "192.168.1.20:47473".parse().unwrap();
        let datagram = Datagram::decode(json.as_bytes()).unwrap();
        apply_datagram(&registry.inner.state, datagram, from)
    }

    fn advertise_json(name: &str, port: u16, ts: u64, rate_hz: f64) -> String {
        format!(
            r#"{{"type":"advertise","topic":"{name}","endpoint":"10.0.0.7:{port}","timestamp_ms":{ts},"compression":"pointcloud","metrics":{{"connections":3,"rate_hz":{rate_hz},"kind":"point_cloud"}}}}"#
        )
    }

    fn remote(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), port)
    }

    #[tokio::test]
    async fn remote_advertisement_enters_cache() {
        let registry = local_registry();
        let replies = feed(&registry, &advertise_json("lidar", 5000, now_ms(), 12.5));
        assert!(replies.is_empty());

        let found = registry
            .resolve(&topic("lidar"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(found, remote(5000));

        let info = registry.topic_info("lidar").unwrap();
        assert!(!info.local);
        assert_eq!(info.connections, 3);
        assert_eq!(info.compression, Compression::PointCloud);
        assert_eq!(registry.topic_rate("lidar"), Some(12.5));
        assert_eq!(registry.status().remote_registrations, 1);
    }

    #[tokio::test]
    async fn resolve_wakes_on_remote_advertisement() {
        let registry = local_registry();
        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            feed(&feeder, &advertise_json("late/remote", 5001, now_ms(), 1.0));
        });

        let found = registry
            .resolve(&topic("late/remote"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, remote(5001));
    }

    #[tokio::test]
    async fn remote_withdraw_leaves_tombstone() {
        let registry = local_registry();
        let advertised = now_ms();
        feed(&registry, &advertise_json("camera", 5002, advertised, 30.0));
        assert!(registry.topic_info("camera").is_some());

        let withdraw = format!(
            r#"{{"type":"withdraw","topic":"camera","endpoint":"10.0.0.7:5002","timestamp_ms":{}}}"#,
            advertised + 10
        );
        feed(&registry, &withdraw);
        assert!(registry.list_topics().is_empty());
        assert_eq!(registry.topic_rate("camera"), None);

        // A delayed copy of the original advertisement must not bring it back.
        feed(&registry, &advertise_json("camera", 5002, advertised, 30.0));
        assert!(registry.topic_info("camera").is_none());
    }

    #[tokio::test]
    async fn newer_remote_metrics_replace_older() {
        let registry = local_registry();
        let ts = now_ms();
        feed(&registry, &advertise_json("imu", 5003, ts, 100.0));
        feed(&registry, &advertise_json("imu", 5003, ts + 2000, 50.0));
        assert_eq!(registry.topic_rate("imu"), Some(50.0));
    }

    #[tokio::test]
    async fn query_is_answered_from_local_advertisements() {
        let registry = local_registry();
        registry.advertise(&topic("sensors"), endpoint(4010), Compression::None);
        feed(&registry, &advertise_json("other", 5004, now_ms(), 1.0));

        let replies = feed(&registry, r#"{"type":"query","topic":"sensors"}"#);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].endpoint, endpoint(4010));

        assert!(feed(&registry, r#"{"type":"query","topic":"other"}"#).is_empty());
        assert_eq!(feed(&registry, r#"{"type":"query"}"#).len(), 1);
    }

    #[tokio::test]
    #[ignore = "needs a multicast-capable network interface"]
    async fn two_registries_exchange_over_multicast() {
        let port = std::net::UdpSocket::bind("0.0.0.0:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = DiscoveryConfig::default().with_port(port);
        let a = DiscoveryRegistry::start(config.clone()).unwrap();
        let b = DiscoveryRegistry::start(config).unwrap();

        a.advertise(&topic("multicast/test"), endpoint(4005), Compression::None);
        let found = b
            .resolve(&topic("multicast/test"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, endpoint(4005));
        assert!(!b.topic_info("multicast/test").unwrap().local);
    }
}
