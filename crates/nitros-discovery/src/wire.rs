//! Discovery datagrams.
//!
//! Every datagram is one JSON object tagged by `"type"`:
//!
//! ```json
//! {"type":"advertise","topic":"sensors","endpoint":"192.168.1.20:41234",
//!  "timestamp_ms":1718000000000,"compression":"none",
//!  "metrics":{"connections":1,"rate_hz":10.0,"kind":"structured"}}
//! {"type":"withdraw","topic":"sensors","endpoint":"192.168.1.20:41234","timestamp_ms":1718000005000}
//! {"type":"query","topic":"sensors"}
//! {"type":"query"}
//! ```
//!
//! A `reply` carries the same fields as `advertise` and answers a query.

use std::time::{SystemTime, UNIX_EPOCH};

use nitros_codec::Compression;
use nitros_frame::{Kind, Topic};
use nitros_transport::Endpoint;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Largest datagram we expect to receive.
pub const MAX_DATAGRAM: usize = 8 * 1024;

/// Live publisher statistics carried with each advertisement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicMetrics {
    /// Subscribers currently connected.
    #[serde(default)]
    pub connections: usize,
    /// Recent send rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_hz: Option<f64>,
    /// Kind of the last message sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
}

/// "Topic T is served at endpoint E since `timestamp_ms`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub topic: Topic,
    pub endpoint: Endpoint,
    /// Registration time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub metrics: TopicMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datagram {
    Advertise(Advertisement),
    Withdraw {
        topic: Topic,
        endpoint: Endpoint,
        timestamp_ms: u64,
    },
    /// Ask publishers of `topic` (or of every topic) to announce themselves.
    Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<Topic>,
    },
    Reply(Advertisement),
}

impl Datagram {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert() -> Advertisement {
        Advertisement {
            topic: Topic::new("sensors").unwrap(),
            endpoint: "192.168.1.20:41234".parse().unwrap(),
            timestamp_ms: 1_718_000_000_000,
            compression: Compression::None,
            metrics: TopicMetrics {
                connections: 2,
                rate_hz: Some(10.0),
                kind: Some(Kind::Structured),
            },
        }
    }

    #[test]
    fn advertise_json_shape() {
        let json: serde_json::Value =
            serde_json::from_slice(&Datagram::Advertise(advert()).encode().unwrap()).unwrap();
        assert_eq!(json["type"], "advertise");
        assert_eq!(json["topic"], "sensors");
        assert_eq!(json["endpoint"], "192.168.1.20:41234");
        assert_eq!(json["compression"], "none");
        assert_eq!(json["metrics"]["kind"], "structured");
    }

    #[test]
    fn roundtrip_every_variant() {
        let datagrams = [
            Datagram::Advertise(advert()),
            Datagram::Reply(advert()),
            Datagram::Withdraw {
                topic: Topic::new("sensors").unwrap(),
                endpoint: "10.0.0.1:9000".parse().unwrap(),
                timestamp_ms: 5,
            },
            Datagram::Query {
                topic: Some(Topic::new("camera/front").unwrap()),
            },
            Datagram::Query { topic: None },
        ];
        for datagram in datagrams {
            let bytes = datagram.encode().unwrap();
            assert!(bytes.len() < MAX_DATAGRAM);
            assert_eq!(Datagram::decode(&bytes).unwrap(), datagram);
        }
    }

    #[test]
    fn minimal_advertise_uses_defaults() {
        let raw = br#"{"type":"advertise","topic":"t","endpoint":"127.0.0.1:1","timestamp_ms":1}"#;
        let Datagram::Advertise(ad) = Datagram::decode(raw).unwrap() else {
            panic!("expected advertise");
        };
        assert_eq!(ad.compression, Compression::None);
        assert_eq!(ad.metrics, TopicMetrics::default());
    }

    #[test]
    fn invalid_topic_rejected() {
        let raw = br#"{"type":"query","topic":"has space"}"#;
        assert!(Datagram::decode(raw).is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Datagram::decode(br#"{"type":"gossip"}"#).is_err());
        assert!(Datagram::decode(b"not json").is_err());
    }
}
