//! Zero-configuration publish/subscribe messaging for local networks.
//!
//! Publishers advertise topics over multicast discovery; subscribers find
//! them by name, connect over TCP and receive decoded values. Structured
//! data, numeric arrays, images and point clouds each get a codec suited
//! to them.
//!
//! ```no_run
//! use nitros::{DiscoveryRegistry, Publisher, PublisherOptions, Subscriber, SubscriberOptions, Value};
//!
//! # async fn demo() -> nitros::Result<()> {
//! let registry = DiscoveryRegistry::shared()?;
//! let publisher = Publisher::new(&registry, "sensors", PublisherOptions::default()).await?;
//! let subscriber = Subscriber::new(
//!     &registry,
//!     "sensors",
//!     |msg| println!("{msg:?}"),
//!     SubscriberOptions::default(),
//! )?;
//!
//! publisher.wait_for_subscribers(1, std::time::Duration::from_secs(5)).await;
//! publisher.send(Value::map([("temperature", Value::from(23.5))]))?;
//! # subscriber.close().await;
//! # publisher.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, TCP listeners and multicast sockets
//! - [`frame`]: topic-addressed wire framing
//! - [`codec`]: type-aware payload codecs
//! - [`discovery`]: the topic registry
//! - [`pubsub`]: publishers, subscribers and connection management

/// Re-export transport types.
pub mod transport {
    pub use nitros_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nitros_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use nitros_codec::*;
}

/// Re-export discovery types.
pub mod discovery {
    pub use nitros_discovery::*;
}

/// Re-export publisher and subscriber types.
pub mod pubsub {
    pub use nitros_pubsub::*;
}

pub use nitros_pubsub::{
    BackoffConfig, CodecError, Compression, DType, DiscoveryConfig, DiscoveryRegistry, Kind,
    Message, NdArray, OverflowPolicy, PubSubError, Publisher, PublisherOptions, ReceiveError,
    Result, Subscriber, SubscriberOptions, Topic, TopicInfo, Value,
};
