//! Soft-state registration cache.
//!
//! Holds three tables:
//! - local advertisements, which never expire and are re-broadcast
//! - remote registrations, which expire unless refreshed
//! - withdrawal tombstones, which stop a delayed advertisement from
//!   resurrecting a withdrawn endpoint
//!
//! Every mutation takes an explicit `now` so expiry is testable.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use nitros_codec::Compression;
use nitros_frame::Topic;
use nitros_transport::Endpoint;

use crate::wire::{Advertisement, TopicMetrics};

/// A publisher registration as seen by this process.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub topic: Topic,
    pub endpoint: Endpoint,
    /// Registration time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub compression: Compression,
    pub metrics: TopicMetrics,
    /// Advertised by this process.
    pub local: bool,
}

impl Registration {
    fn from_advertisement(ad: Advertisement, local: bool) -> Self {
        Self {
            topic: ad.topic,
            endpoint: ad.endpoint,
            timestamp_ms: ad.timestamp_ms,
            compression: ad.compression,
            metrics: ad.metrics,
            local,
        }
    }

    pub fn to_advertisement(&self) -> Advertisement {
        Advertisement {
            topic: self.topic.clone(),
            endpoint: self.endpoint,
            timestamp_ms: self.timestamp_ms,
            compression: self.compression,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Debug)]
struct RemoteEntry {
    registration: Registration,
    last_seen: Instant,
}

#[derive(Debug)]
struct Tombstone {
    timestamp_ms: u64,
    created: Instant,
}

/// What applying a remote advertisement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New registration or newer timestamp.
    Inserted,
    /// Same registration seen again.
    Refreshed,
    /// Older than what we hold, tombstoned, or our own echo.
    Ignored,
}

type Key = (Topic, Endpoint);

#[derive(Debug, Default)]
pub struct Cache {
    local: HashMap<Key, Registration>,
    remote: HashMap<Topic, HashMap<Endpoint, RemoteEntry>>,
    tombstones: HashMap<Key, Tombstone>,
}

impl Cache {
    /// Record a local advertisement. Replaces any earlier one for the key.
    pub fn advertise_local(&mut self, registration: Registration) {
        let key = (registration.topic.clone(), registration.endpoint);
        self.tombstones.remove(&key);
        if let Some(entries) = self.remote.get_mut(&registration.topic) {
            entries.remove(&registration.endpoint);
        }
        self.local.insert(key, registration);
    }

    /// Drop a local advertisement and tombstone it. Returns whether it existed.
    ///
    /// The tombstone is never older than the registration it replaces, so a
    /// backwards clock step cannot let our own refresh echo back in.
    pub fn withdraw_local(
        &mut self,
        topic: &Topic,
        endpoint: Endpoint,
        timestamp_ms: u64,
        now: Instant,
    ) -> bool {
        let key = (topic.clone(), endpoint);
        let removed = self.local.remove(&key);
        let registered = removed.as_ref().map_or(0, |r| r.timestamp_ms);
        self.tombstones.insert(
            key,
            Tombstone {
                timestamp_ms: timestamp_ms.max(registered),
                created: now,
            },
        );
        removed.is_some()
    }

    pub fn update_local_metrics(
        &mut self,
        topic: &Topic,
        endpoint: Endpoint,
        metrics: TopicMetrics,
    ) -> bool {
        match self.local.get_mut(&(topic.clone(), endpoint)) {
            Some(registration) => {
                registration.metrics = metrics;
                true
            }
            None => false,
        }
    }

    /// Local advertisements, optionally filtered by topic.
    pub fn local_advertisements(&self, topic: Option<&Topic>) -> Vec<Advertisement> {
        self.local
            .values()
            .filter(|r| topic.is_none_or(|t| &r.topic == t))
            .map(Registration::to_advertisement)
            .collect()
    }

    /// Apply an advertisement received from the network.
    pub fn apply_remote(&mut self, ad: Advertisement, now: Instant) -> Applied {
        let key = (ad.topic.clone(), ad.endpoint);
        if self.local.contains_key(&key) {
            return Applied::Ignored;
        }
        if let Some(tombstone) = self.tombstones.get(&key) {
            if ad.timestamp_ms <= tombstone.timestamp_ms {
                return Applied::Ignored;
            }
            self.tombstones.remove(&key);
        }

        let entries = self.remote.entry(ad.topic.clone()).or_default();
        match entries.get_mut(&ad.endpoint) {
            Some(entry) if ad.timestamp_ms < entry.registration.timestamp_ms => Applied::Ignored,
            Some(entry) if ad.timestamp_ms == entry.registration.timestamp_ms => {
                entry.last_seen = now;
                entry.registration.compression = ad.compression;
                entry.registration.metrics = ad.metrics;
                Applied::Refreshed
            }
            _ => {
                entries.insert(
                    ad.endpoint,
                    RemoteEntry {
                        registration: Registration::from_advertisement(ad, false),
                        last_seen: now,
                    },
                );
                Applied::Inserted
            }
        }
    }

    /// Apply a withdrawal received from the network.
    pub fn apply_withdraw(
        &mut self,
        topic: &Topic,
        endpoint: Endpoint,
        timestamp_ms: u64,
        now: Instant,
    ) -> bool {
        let key = (topic.clone(), endpoint);
        if self.local.contains_key(&key) {
            return false;
        }
        let keep_newer = self
            .tombstones
            .get(&key)
            .is_some_and(|t| t.timestamp_ms >= timestamp_ms);
        if !keep_newer {
            self.tombstones.insert(
                key,
                Tombstone {
                    timestamp_ms,
                    created: now,
                },
            );
        }

        let Some(entries) = self.remote.get_mut(topic) else {
            return false;
        };
        let removed = match entries.get(&endpoint) {
            Some(entry) if entry.registration.timestamp_ms <= timestamp_ms => {
                entries.remove(&endpoint);
                true
            }
            _ => false,
        };
        if entries.is_empty() {
            self.remote.remove(topic);
        }
        removed
    }

    /// Forget a remote registration (e.g. its endpoint refused connections).
    pub fn invalidate(&mut self, topic: &Topic, endpoint: Endpoint) -> bool {
        let Some(entries) = self.remote.get_mut(topic) else {
            return false;
        };
        let removed = entries.remove(&endpoint).is_some();
        if entries.is_empty() {
            self.remote.remove(topic);
        }
        removed
    }

    /// The registration a subscriber should use: newest registration wins,
    /// local or remote.
    pub fn lookup(&self, topic: &Topic) -> Option<&Registration> {
        let local = self
            .local
            .values()
            .filter(|r| &r.topic == topic);
        let remote = self
            .remote
            .get(topic)
            .into_iter()
            .flat_map(|entries| entries.values().map(|e| &e.registration));
        local
            .chain(remote)
            .max_by_key(|r| (r.timestamp_ms, r.local, r.endpoint))
    }

    /// Evict remote entries and tombstones older than `ttl`. Returns the
    /// number of registrations evicted.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.remote.retain(|_, entries| {
            entries.retain(|_, entry| {
                let keep = now.saturating_duration_since(entry.last_seen) < ttl;
                if !keep {
                    evicted += 1;
                }
                keep
            });
            !entries.is_empty()
        });
        self.tombstones
            .retain(|_, t| now.saturating_duration_since(t.created) < ttl);
        evicted
    }

    /// Every topic with at least one live registration.
    pub fn topics(&self) -> BTreeSet<String> {
        self.local
            .keys()
            .map(|(topic, _)| topic.to_string())
            .chain(self.remote.keys().map(Topic::to_string))
            .collect()
    }

    pub fn local_count(&self) -> usize {
        self.local.len()
    }

    pub fn remote_count(&self) -> usize {
        self.remote.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(6);

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    fn endpoint(port: u16) -> Endpoint {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    fn ad(name: &str, port: u16, ts: u64) -> Advertisement {
        Advertisement {
            topic: topic(name),
            endpoint: endpoint(port),
            timestamp_ms: ts,
            compression: Compression::None,
            metrics: TopicMetrics::default(),
        }
    }

    fn local(name: &str, port: u16, ts: u64) -> Registration {
        Registration::from_advertisement(ad(name, port, ts), true)
    }

    #[test]
    fn remote_insert_refresh_and_stale() {
        let mut cache = Cache::default();
        let now = Instant::now();
        assert_eq!(cache.apply_remote(ad("a", 1, 100), now), Applied::Inserted);
        assert_eq!(cache.apply_remote(ad("a", 1, 100), now), Applied::Refreshed);
        assert_eq!(cache.apply_remote(ad("a", 1, 50), now), Applied::Ignored);
        assert_eq!(cache.apply_remote(ad("a", 1, 200), now), Applied::Inserted);
        assert_eq!(cache.lookup(&topic("a")).unwrap().timestamp_ms, 200);
    }

    #[test]
    fn newest_registration_wins() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.apply_remote(ad("a", 1, 100), now);
        cache.apply_remote(ad("a", 2, 300), now);
        cache.apply_remote(ad("a", 3, 200), now);
        assert_eq!(cache.lookup(&topic("a")).unwrap().endpoint, endpoint(2));

        cache.advertise_local(local("a", 4, 400));
        let winner = cache.lookup(&topic("a")).unwrap();
        assert_eq!(winner.endpoint, endpoint(4));
        assert!(winner.local);
    }

    #[test]
    fn withdraw_removes_only_matching_endpoint() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.apply_remote(ad("a", 1, 100), now);
        cache.apply_remote(ad("a", 2, 100), now);

        assert!(cache.apply_withdraw(&topic("a"), endpoint(1), 150, now));
        assert_eq!(cache.lookup(&topic("a")).unwrap().endpoint, endpoint(2));
        assert!(!cache.apply_withdraw(&topic("a"), endpoint(9), 150, now));
    }

    #[test]
    fn older_withdraw_does_not_remove_newer_registration() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.apply_remote(ad("a", 1, 300), now);
        assert!(!cache.apply_withdraw(&topic("a"), endpoint(1), 200, now));
        assert!(cache.lookup(&topic("a")).is_some());
    }

    #[test]
    fn tombstone_blocks_delayed_advertisement() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.apply_remote(ad("a", 1, 100), now);
        cache.apply_withdraw(&topic("a"), endpoint(1), 150, now);

        assert_eq!(cache.apply_remote(ad("a", 1, 100), now), Applied::Ignored);
        assert!(cache.lookup(&topic("a")).is_none());

        // A genuinely newer registration of the same endpoint is accepted.
        assert_eq!(cache.apply_remote(ad("a", 1, 500), now), Applied::Inserted);
    }

    #[test]
    fn local_withdraw_blocks_own_echo() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.advertise_local(local("a", 1, 100));
        assert_eq!(cache.apply_remote(ad("a", 1, 100), now), Applied::Ignored);
        assert_eq!(cache.remote_count(), 0);

        assert!(cache.withdraw_local(&topic("a"), endpoint(1), 120, now));
        assert_eq!(cache.apply_remote(ad("a", 1, 100), now), Applied::Ignored);
        assert!(cache.lookup(&topic("a")).is_none());
    }

    #[test]
    fn sweep_expires_remote_but_not_local() {
        let mut cache = Cache::default();
        let start = Instant::now();
        cache.apply_remote(ad("remote", 1, 100), start);
        cache.advertise_local(local("mine", 2, 100));

        assert_eq!(cache.sweep(start + Duration::from_secs(3), TTL), 0);
        assert_eq!(cache.apply_remote(ad("remote", 1, 100), start + Duration::from_secs(3)), Applied::Refreshed);
        assert_eq!(cache.sweep(start + Duration::from_secs(8), TTL), 0);
        assert_eq!(cache.sweep(start + Duration::from_secs(10), TTL), 1);

        assert!(cache.lookup(&topic("remote")).is_none());
        assert!(cache.lookup(&topic("mine")).is_some());
        assert_eq!(cache.topics().into_iter().collect::<Vec<_>>(), ["mine"]);
    }

    #[test]
    fn tombstones_expire() {
        let mut cache = Cache::default();
        let start = Instant::now();
        cache.apply_withdraw(&topic("a"), endpoint(1), 150, start);
        cache.sweep(start + TTL, TTL);
        assert_eq!(
            cache.apply_remote(ad("a", 1, 100), start + TTL),
            Applied::Inserted
        );
    }

    #[test]
    fn invalidate_drops_remote_only() {
        let mut cache = Cache::default();
        let now = Instant::now();
        cache.apply_remote(ad("a", 1, 100), now);
        cache.advertise_local(local("b", 2, 100));
        assert!(cache.invalidate(&topic("a"), endpoint(1)));
        assert!(!cache.invalidate(&topic("b"), endpoint(2)));
        assert!(cache.lookup(&topic("b")).is_some());
    }

    #[test]
    fn metrics_update_and_local_filter() {
        let mut cache = Cache::default();
        cache.advertise_local(local("a", 1, 100));
        cache.advertise_local(local("b", 2, 100));
        let metrics = TopicMetrics {
            connections: 3,
            rate_hz: Some(5.0),
            kind: None,
        };
        assert!(cache.update_local_metrics(&topic("a"), endpoint(1), metrics.clone()));
        assert!(!cache.update_local_metrics(&topic("a"), endpoint(9), metrics.clone()));

        let ads = cache.local_advertisements(Some(&topic("a")));
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].metrics, metrics);
        assert_eq!(cache.local_advertisements(None).len(), 2);
    }
}
