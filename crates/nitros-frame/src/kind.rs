//! Kind tags carried in every frame header.
//!
//! Tag values are part of the wire contract and must never be renumbered.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Which codec path a frame's payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Kind {
    /// Connection management (subscribe handshake).
    Control = 0,
    /// Self-describing nested maps/sequences/primitives.
    Structured = 1,
    /// Raw homogeneous numeric buffer with shape header.
    NumericArray = 2,
    /// Pixel buffer, lossy-compressed.
    Image = 3,
    /// N x D coordinate rows, quantized and compressed.
    PointCloud = 4,
}

impl Kind {
    /// All data-carrying kinds, in tag order.
    pub const DATA: [Kind; 4] = [
        Kind::Structured,
        Kind::NumericArray,
        Kind::Image,
        Kind::PointCloud,
    ];

    /// The wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Kind::Control),
            1 => Ok(Kind::Structured),
            2 => Ok(Kind::NumericArray),
            3 => Ok(Kind::Image),
            4 => Ok(Kind::PointCloud),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Control => "control",
            Kind::Structured => "structured",
            Kind::NumericArray => "numeric_array",
            Kind::Image => "image",
            Kind::PointCloud => "point_cloud",
        }
    }

    /// Returns true for kinds that carry user data.
    pub fn is_data(self) -> bool {
        self != Kind::Control
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip() {
        for kind in [Kind::Control].into_iter().chain(Kind::DATA) {
            assert_eq!(Kind::from_tag(kind.tag()).unwrap(), kind);
        }
    }

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(Kind::Control.tag(), 0);
        assert_eq!(Kind::Structured.tag(), 1);
        assert_eq!(Kind::NumericArray.tag(), 2);
        assert_eq!(Kind::Image.tag(), 3);
        assert_eq!(Kind::PointCloud.tag(), 4);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(
            Kind::from_tag(9),
            Err(ProtocolError::UnknownKind(9))
        ));
    }

    #[test]
    fn only_control_is_not_data() {
        assert!(!Kind::Control.is_data());
        assert!(Kind::DATA.iter().all(|kind| kind.is_data()));
    }
}
