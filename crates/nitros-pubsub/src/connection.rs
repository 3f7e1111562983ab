//! Per-subscriber connection state on the publisher side.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use nitros_frame::{Frame, Kind, Topic};
use tokio::sync::watch;

use crate::queue::{BoundedQueue, Enqueue, OverflowPolicy};

/// Lifecycle of a connection.
///
/// `Connecting -> Established -> Draining -> Closed`, where `Draining` is
/// skipped when the peer disconnects first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Established = 1,
    Draining = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Established,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Established => "established",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically shared [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One subscriber's outbound queue. Sequence numbers are assigned at
/// enqueue time, so frames evicted by overflow show up as gaps. The
/// sequence lock is held across the push, so queue order always matches
/// sequence order even with concurrent senders.
#[derive(Debug)]
pub struct PeerConnection {
    id: u64,
    peer: SocketAddr,
    state: StateCell,
    queue: BoundedQueue<Frame>,
    next_seq: Mutex<u64>,
    dropped: AtomicU64,
}

impl PeerConnection {
    pub fn new(id: u64, peer: SocketAddr, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            id,
            peer,
            state: StateCell::new(ConnectionState::Connecting),
            queue: BoundedQueue::new(capacity, policy),
            next_seq: Mutex::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// Frames lost to the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue one data frame. Returns the outcome and the sequence number
    /// assigned to the frame.
    pub fn enqueue(&self, topic: &Topic, kind: Kind, payload: &Bytes) -> (Enqueue, u64) {
        let frame = |seq| Frame::new(topic.clone(), kind, seq, payload.clone());
        let (outcome, seq) = {
            let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = *next;
            *next += 1;
            (self.queue.push(frame(seq)), seq)
        };
        if outcome.lost() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        (outcome, seq)
    }

    pub(crate) fn queue(&self) -> &BoundedQueue<Frame> {
        &self.queue
    }
}

/// All established connections of one publisher.
#[derive(Debug)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<u64, Arc<PeerConnection>>>,
    next_id: AtomicU64,
    count: watch::Sender<usize>,
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            count: watch::Sender::new(0),
        }
    }
}

impl ConnectionSet {
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `conn` unless `limit` connections already exist. The
    /// returned guard unregisters it on drop.
    pub fn try_insert(
        self: &Arc<Self>,
        conn: Arc<PeerConnection>,
        limit: usize,
    ) -> Option<ConnectionGuard> {
        let mut map = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.len() >= limit {
            return None;
        }
        conn.set_state(ConnectionState::Established);
        map.insert(conn.id(), Arc::clone(&conn));
        self.count.send_replace(map.len());
        Some(ConnectionGuard {
            set: Arc::clone(self),
            conn,
        })
    }

    fn remove(&self, id: u64) {
        let mut map = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.remove(&id).is_some() {
            self.count.send_replace(map.len());
        }
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections that can accept frames right now.
    pub fn established(&self) -> Vec<Arc<PeerConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.state() == ConnectionState::Established)
            .cloned()
            .collect()
    }

    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }
}

/// Keeps a connection registered. Dropping it closes the queue, marks the
/// connection closed and removes it from the set.
#[derive(Debug)]
pub struct ConnectionGuard {
    set: Arc<ConnectionSet>,
    conn: Arc<PeerConnection>,
}

impl ConnectionGuard {
    pub fn connection(&self) -> &Arc<PeerConnection> {
        &self.conn
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.queue.close();
        self.conn.set_state(ConnectionState::Closed);
        self.set.remove(self.conn.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(set: &ConnectionSet, capacity: usize) -> Arc<PeerConnection> {
        Arc::new(PeerConnection::new(
            set.next_id(),
            "127.0.0.1:5000".parse().unwrap(),
            capacity,
            OverflowPolicy::DropOldest,
        ))
    }

    #[test]
    fn guard_registers_and_unregisters() {
        let set = Arc::new(ConnectionSet::default());
        let c = conn(&set, 4);
        let guard = set.try_insert(Arc::clone(&c), 8).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(c.state(), ConnectionState::Established);
        assert_eq!(*set.subscribe_count().borrow(), 1);

        drop(guard);
        assert!(set.is_empty());
        assert_eq!(c.state(), ConnectionState::Closed);
        assert!(c.queue().is_closed());
        assert_eq!(*set.subscribe_count().borrow(), 0);
    }

    #[test]
    fn limit_is_enforced() {
        let set = Arc::new(ConnectionSet::default());
        let _a = set.try_insert(conn(&set, 4), 1).unwrap();
        assert!(set.try_insert(conn(&set, 4), 1).is_none());
    }

    #[test]
    fn overflow_leaves_sequence_gap() {
        let set = ConnectionSet::default();
        let c = conn(&set, 2);
        let topic = Topic::new("t").unwrap();
        let payload = Bytes::from_static(b"x");
        for _ in 0..3 {
            c.enqueue(&topic, Kind::Structured, &payload);
        }
        assert_eq!(c.dropped(), 1);
        let seqs: Vec<u64> = std::iter::from_fn(|| c.queue().try_pop())
            .map(|f| f.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn concurrent_senders_keep_sequence_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let set = ConnectionSet::default();
        let c = conn(&set, THREADS * PER_THREAD);
        let topic = Topic::new("t").unwrap();
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    let payload = Bytes::from_static(b"x");
                    for _ in 0..PER_THREAD {
                        c.enqueue(&topic, Kind::Structured, &payload);
                    }
                });
            }
        });

        let seqs: Vec<u64> = std::iter::from_fn(|| c.queue().try_pop())
            .map(|f| f.seq)
            .collect();
        assert_eq!(seqs.len(), THREADS * PER_THREAD);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "queue order diverged from sequence order");
        assert_eq!(c.dropped(), 0);
    }

    #[test]
    fn draining_connections_are_not_established() {
        let set = Arc::new(ConnectionSet::default());
        let c = conn(&set, 2);
        let _guard = set.try_insert(Arc::clone(&c), 4).unwrap();
        assert_eq!(set.established().len(), 1);
        c.set_state(ConnectionState::Draining);
        assert!(set.established().is_empty());
    }
}
