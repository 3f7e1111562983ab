//! Topic-addressed, length-prefixed message framing.
//!
//! Every message on a nitros connection is framed with:
//! - A 2-byte magic number ("NT") for stream synchronization
//! - The topic name, prefixed by its 2-byte length
//! - A 1-byte kind tag selecting the payload codec
//! - An 8-byte sequence number, monotonic per connection
//! - A 4-byte payload length followed by the payload
//!
//! All integers are little-endian. [`decode_frame`] is restartable: it
//! consumes nothing until a whole frame is buffered.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod kind;
pub mod topic;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, FIXED_HEADER_SIZE, MAGIC,
};
pub use error::{ProtocolError, Result};
#[cfg(feature = "async")]
pub use framed::FrameCodec;
pub use kind::Kind;
pub use topic::{Topic, MAX_TOPIC_LEN};
