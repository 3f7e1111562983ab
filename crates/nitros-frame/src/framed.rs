//! `tokio_util::codec` adapter over [`encode_frame`]/[`decode_frame`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::{ProtocolError, Result};

/// Frame codec for `FramedRead`/`FramedWrite` over async byte streams.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    /// Create a codec with explicit configuration.
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => {
                debug!(remaining = buf.len(), "stream closed mid-frame");
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Frame>>::encode(self, &item, dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.config.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: item.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::kind::Kind;
    use crate::topic::Topic;

    fn frame(seq: u64, payload: &'static [u8]) -> Frame {
        Frame::new(Topic::new("sensors").unwrap(), Kind::Structured, seq, payload)
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(left, FrameCodec::default());
        let mut reader = FramedRead::new(right, FrameCodec::default());

        let send = tokio::spawn(async move {
            for seq in 0..16u64 {
                writer.send(frame(seq, b"payload")).await.unwrap();
            }
        });

        for expected in 0..16u64 {
            let got = reader.next().await.unwrap().unwrap();
            assert_eq!(got.seq, expected);
            assert_eq!(got.payload.as_ref(), b"payload");
        }
        send.await.unwrap();
    }

    #[tokio::test]
    async fn truncated_stream_reports_connection_closed() {
        let (mut left, right) = tokio::io::duplex(64);
        let mut wire = BytesMut::new();
        encode_frame(&frame(0, b"abcdef"), &mut wire).unwrap();
        left.write_all(&wire[..wire.len() - 3]).await.unwrap();
        drop(left);

        let mut reader = FramedRead::new(right, FrameCodec::default());
        let err = reader.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn clean_eof_ends_stream() {
        let (left, right) = tokio::io::duplex(64);
        drop(left);
        let mut reader = FramedRead::new(right, FrameCodec::default());
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn oversized_payload_rejected_on_encode() {
        let mut codec = FrameCodec::new(FrameConfig {
            max_payload_size: 4,
        });
        let mut dst = BytesMut::new();
        let oversized = frame(0, b"oversized");
        let err = Encoder::<&Frame>::encode(&mut codec, &oversized, &mut dst).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
