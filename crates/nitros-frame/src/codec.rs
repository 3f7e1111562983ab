use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::kind::Kind;
use crate::topic::{Topic, MAX_TOPIC_LEN};

/// Fixed header bytes: magic (2) + topic length (2) + kind (1) + seq (8) + payload length (4).
pub const FIXED_HEADER_SIZE: usize = 17;

/// Magic bytes: "NT" (0x4e 0x54).
pub const MAGIC: [u8; 2] = [0x4e, 0x54];

/// Default maximum payload size: 64 MiB (uncompressed images and clouds).
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Bytes before the topic: magic (2) + topic length (2).
const PREFIX_SIZE: usize = 4;

/// A framed message addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The topic this message belongs to.
    pub topic: Topic,
    /// Codec path of the payload.
    pub kind: Kind,
    /// Sequence number, monotonic per connection.
    pub seq: u64,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(topic: Topic, kind: Kind, seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            topic,
            kind,
            seq,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + topic + payload).
    pub fn wire_size(&self) -> usize {
        FIXED_HEADER_SIZE + self.topic.as_str().len() + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (all integers little-endian):
/// ```text
/// ┌───────────┬───────────┬─────────┬──────────┬──────────┬─────────────┬──────────────┐
/// │ Magic (2) │ TopicLen  │ Topic   │ Kind (1) │ Seq (8)  │ PayloadLen  │ Payload      │
/// │ "NT"      │ (2B LE)   │ (bytes) │          │ (8B LE)  │ (4B LE)     │ (PayloadLen) │
/// └───────────┴───────────┴─────────┴──────────┴──────────┴─────────────┴──────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > u32::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge {
            size: frame.payload.len(),
            max: u32::MAX as usize,
        });
    }
    let topic = frame.topic.as_str().as_bytes();

    dst.reserve(frame.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u16_le(topic.len() as u16);
    dst.put_slice(topic);
    dst.put_u8(frame.kind.tag());
    dst.put_u64_le(frame.seq);
    dst.put_u32_le(frame.payload.len() as u32);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet;
/// nothing is consumed in that case. On success, consumes exactly one frame.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < PREFIX_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(ProtocolError::InvalidMagic);
    }

    let topic_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    if topic_len == 0 || topic_len > MAX_TOPIC_LEN {
        return Err(ProtocolError::InvalidTopic(format!(
            "topic length {topic_len} out of range"
        )));
    }

    let header_len = FIXED_HEADER_SIZE + topic_len;
    if src.len() < header_len {
        return Ok(None); // Need more data
    }

    let mut header = &src[PREFIX_SIZE + topic_len..header_len];
    let kind = Kind::from_tag(header.get_u8())?;
    let seq = header.get_u64_le();
    let payload_len = header.get_u32_le() as usize;

    if payload_len > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = header_len + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let topic = std::str::from_utf8(&src[PREFIX_SIZE..PREFIX_SIZE + topic_len])
        .map_err(|_| ProtocolError::InvalidTopic("topic is not UTF-8".to_string()))
        .and_then(Topic::new)?;

    src.advance(header_len);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        topic,
        kind,
        seq,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
