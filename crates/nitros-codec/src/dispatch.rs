use nitros_frame::Kind;
use tracing::debug;

use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::message::{infer_kind, Compression, Message};
use crate::{image, numeric, pointcloud, structured};

type EncodeFn = fn(&Message, &CodecConfig) -> Result<Vec<u8>>;
type DecodeFn = fn(&[u8]) -> Result<Message>;

struct KindCodec {
    kind: Kind,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Payload codecs, one per data kind.
static CODECS: [KindCodec; 4] = [
    KindCodec {
        kind: Kind::Structured,
        encode: structured::encode,
        decode: structured::decode,
    },
    KindCodec {
        kind: Kind::NumericArray,
        encode: numeric::encode,
        decode: numeric::decode,
    },
    KindCodec {
        kind: Kind::Image,
        encode: image::encode,
        decode: image::decode,
    },
    KindCodec {
        kind: Kind::PointCloud,
        encode: pointcloud::encode,
        decode: pointcloud::decode,
    },
];

fn codec_for(kind: Kind) -> Result<&'static KindCodec> {
    CODECS
        .iter()
        .find(|codec| codec.kind == kind)
        .ok_or(CodecError::NoCodec(kind))
}

/// Encode a message, inferring its kind from shape and compression.
pub fn encode(
    message: &Message,
    compression: Compression,
    config: &CodecConfig,
) -> Result<(Kind, Vec<u8>)> {
    let kind = infer_kind(message, compression);
    encode_as(kind, message, config).map(|payload| (kind, payload))
}

/// Encode a message with an explicit kind.
pub fn encode_as(kind: Kind, message: &Message, config: &CodecConfig) -> Result<Vec<u8>> {
    let payload = (codec_for(kind)?.encode)(message, config)?;
    debug!(%kind, bytes = payload.len(), "encoded payload");
    Ok(payload)
}

/// Decode a payload of the given kind.
pub fn decode(kind: Kind, payload: &[u8]) -> Result<Message> {
    (codec_for(kind)?.decode)(payload)
}
