//! Network transport primitives for nitros.
//!
//! Provides the pieces every other layer builds on:
//! - [`Endpoint`], the address a publisher listens on
//! - TCP listener binding with advertised-address selection
//! - Multicast UDP sockets for discovery (shared port, loopback enabled)
//!
//! This is the lowest layer of nitros.

pub mod endpoint;
pub mod error;
pub mod multicast;
pub mod tcp;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use multicast::{bind_multicast, MulticastConfig};
pub use tcp::{bind_listener, connect, local_ip};
