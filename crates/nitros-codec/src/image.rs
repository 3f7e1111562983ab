//! Lossy image codec for `(height, width, channels)` `uint8` arrays.
//!
//! ```text
//! height u32 LE | width u32 LE | channels u8 | body
//!
//! channels 1, 3: body = JPEG
//! channels 4:    body = jpeg_len u32 LE | JPEG (RGB) | zstd(alpha plane)
//! ```

use std::borrow::Cow;

use ::image::codecs::jpeg::JpegEncoder;
use ::image::{ExtendedColorType, ImageFormat};
use bytes::{Buf, BufMut};
use tracing::trace;

use crate::array::{DType, NdArray};
use crate::compress::{deflate, inflate};
use crate::config::CodecConfig;
use crate::error::{CodecError, Result};
use crate::message::Message;
use crate::numeric::need;

const HEADER_LEN: usize = 9;

pub(crate) fn encode(message: &Message, config: &CodecConfig) -> Result<Vec<u8>> {
    let array = match message {
        Message::Array(array) => array,
        Message::Structured(_) => {
            return Err(CodecError::UnsupportedType(
                "image codec needs an array".into(),
            ))
        }
    };
    if array.dtype() != DType::U8 {
        return Err(CodecError::UnsupportedType(format!(
            "image must be uint8, got {}",
            array.dtype()
        )));
    }
    let (height, width, channels) = match *array.shape() {
        [h, w, c @ (1 | 3 | 4)] if h > 0 && w > 0 => (h, w, c),
        _ => {
            return Err(CodecError::UnsupportedType(format!(
                "image shape {:?} is not (height, width, 1|3|4)",
                array.shape()
            )))
        }
    };
    let dim = |extent: usize| {
        u32::try_from(extent)
            .map_err(|_| CodecError::UnsupportedType(format!("image extent {extent} too large")))
    };
    let (h, w) = (dim(height)?, dim(width)?);

    let pixels = array.data().as_ref();
    let (color, alpha) = match channels {
        1 | 3 => (Cow::Borrowed(pixels), None),
        _ => {
            let (rgb, alpha) = split_alpha(pixels);
            (Cow::Owned(rgb), Some(alpha))
        }
    };
    let color_type = if channels == 1 {
        ExtendedColorType::L8
    } else {
        ExtendedColorType::Rgb8
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, config.image_quality)
        .encode(&color, w, h, color_type)?;

    let mut out = Vec::with_capacity(HEADER_LEN + 4 + jpeg.len());
    out.put_u32_le(h);
    out.put_u32_le(w);
    out.put_u8(channels as u8);
    match alpha {
        None => out.extend_from_slice(&jpeg),
        Some(alpha) => {
            let packed = deflate(&alpha, config.zstd_level)?;
            out.put_u32_le(jpeg.len() as u32);
            out.extend_from_slice(&jpeg);
            out.extend_from_slice(&packed);
        }
    }
    trace!(
        height,
        width,
        channels,
        raw = pixels.len(),
        encoded = out.len(),
        "encoded image"
    );
    Ok(out)
}

pub(crate) fn decode(payload: &[u8]) -> Result<Message> {
    let mut buf = payload;
    need(buf, HEADER_LEN)?;
    let height = buf.get_u32_le() as usize;
    let width = buf.get_u32_le() as usize;
    let channels = buf.get_u8() as usize;

    let (jpeg, alpha) = match channels {
        1 | 3 => (buf, None),
        4 => {
            need(buf, 4)?;
            let jpeg_len = buf.get_u32_le() as usize;
            need(buf, jpeg_len)?;
            let (jpeg, alpha) = buf.split_at(jpeg_len);
            (jpeg, Some(alpha))
        }
        other => {
            return Err(CodecError::Corrupt(format!(
                "image has {other} channels"
            )))
        }
    };

    let decoded = ::image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?;
    if decoded.width() as usize != width || decoded.height() as usize != height {
        return Err(CodecError::Corrupt(format!(
            "image header says {height}x{width}, JPEG is {}x{}",
            decoded.height(),
            decoded.width()
        )));
    }

    let pixels = match alpha {
        None if channels == 1 => decoded.to_luma8().into_raw(),
        None => decoded.to_rgb8().into_raw(),
        Some(alpha) => {
            let expected = height * width;
            let alpha = inflate(alpha, expected)?;
            if alpha.len() != expected {
                return Err(CodecError::Corrupt(format!(
                    "alpha plane size {} does not match {expected} pixels",
                    alpha.len()
                )));
            }
            merge_alpha(&decoded.to_rgb8().into_raw(), &alpha)
        }
    };

    NdArray::new(DType::U8, vec![height, width, channels], pixels).map(Message::Array)
}

fn split_alpha(rgba: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(rgba.len() / 4);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }
    (rgb, alpha)
}

fn merge_alpha(rgb: &[u8], alpha: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(alpha.len() * 4);
    for (px, a) in rgb.chunks_exact(3).zip(alpha) {
        rgba.extend_from_slice(px);
        rgba.push(*a);
    }
    rgba
}
