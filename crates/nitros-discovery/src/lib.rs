//! Topic-to-endpoint discovery for nitros.
//!
//! Publishers advertise "topic T is served at endpoint E"; subscribers
//! resolve T to E. Advertisements travel as JSON datagrams on a
//! local-network multicast group and land in a soft-state cache:
//!
//! - local advertisements are re-broadcast every refresh interval
//! - remote registrations expire unless refreshed within the TTL
//! - the newest registration for a topic wins
//! - a withdrawal tombstone blocks delayed advertisements for one TTL
//!
//! [`DiscoveryRegistry::shared`] gives the process-wide instance, created
//! on first use and torn down when the last handle drops.

pub mod cache;
pub mod config;
pub mod error;
pub mod introspect;
pub mod registry;
pub mod wire;

pub use cache::Registration;
pub use config::{DiscoveryConfig, DEFAULT_GROUP, DEFAULT_PORT};
pub use error::{DiscoveryError, Result};
pub use introspect::{DiscoveryMode, RegistryStatus, TopicInfo};
pub use nitros_codec::Compression;
pub use nitros_frame::{Kind, Topic};
pub use nitros_transport::Endpoint;
pub use registry::DiscoveryRegistry;
pub use wire::{Advertisement, Datagram, TopicMetrics};
