//! Topic publishers and subscribers over TCP.
//!
//! A [`Publisher`] binds a listener, advertises its topic through a
//! [`DiscoveryRegistry`] and fans messages out to every connected
//! [`Subscriber`]. Subscribers find publishers through the same registry and
//! reconnect automatically when a publisher goes away or restarts.
//!
//! Delivery is at-most-once and in order per connection. Nothing is
//! buffered for subscribers that are not connected, and a slow subscriber
//! loses its oldest frames rather than slowing the publisher down.

pub mod connection;
pub mod connector;
pub mod error;
pub mod handshake;
mod listener;
pub mod observe;
pub mod options;
pub mod publisher;
pub mod queue;
pub mod rate;
pub mod subscriber;

pub use connection::ConnectionState;
pub use connector::Backoff;
pub use error::{ConnectionError, PubSubError, ReceiveError, Result};
pub use handshake::{SubscribeRequest, SubscribeResponse, PROTOCOL_NAME, PROTOCOL_VERSION};
pub use nitros_codec::{CodecConfig, CodecError, Compression, DType, Message, NdArray, Value};
pub use nitros_discovery::{DiscoveryConfig, DiscoveryRegistry, TopicInfo};
pub use nitros_frame::{Kind, Topic};
pub use nitros_transport::Endpoint;
pub use observe::{EventKind, EventSink, TopicEvent, TracingSink};
pub use options::{BackoffConfig, PublisherOptions, SubscriberOptions};
pub use publisher::Publisher;
pub use queue::{BoundedQueue, Enqueue, OverflowPolicy};
pub use rate::RateWindow;
pub use subscriber::Subscriber;
