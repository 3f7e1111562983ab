//! Subscription handshake.
//!
//! After connecting, the subscriber sends one JSON request on a control
//! frame and the publisher answers with one JSON response:
//!
//! ```json
//! {"protocol":"nitros","version":"1.0","topic":"sensors"}
//! {"protocol":"nitros","version":"1.0","topic":"sensors","accepted":true}
//! ```
//!
//! A publisher answers `accepted: false` with a `reason` when the topic is
//! wrong, the version is incompatible or it has no room for another
//! subscriber, then closes the connection. Data frames follow an accepted
//! response.

use futures_util::{SinkExt, StreamExt};
use nitros_frame::{Frame, FrameCodec, Kind, ProtocolError, Topic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::ConnectionError;

pub const PROTOCOL_NAME: &str = "nitros";
pub const PROTOCOL_VERSION: &str = "1.0";

/// Frame payload cap for the subscriber-to-publisher direction, which only
/// ever carries handshake requests.
pub const MAX_HANDSHAKE_PAYLOAD: usize = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub protocol: String,
    pub version: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub protocol: String,
    pub version: String,
    pub topic: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

type Reader<R> = FramedRead<R, FrameCodec>;
type Writer<W> = FramedWrite<W, FrameCodec>;

/// Subscriber side: request `topic` and wait for the verdict.
pub(crate) async fn subscribe<R, W>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    topic: &Topic,
) -> Result<SubscribeResponse, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = SubscribeRequest {
        protocol: PROTOCOL_NAME.to_string(),
        version: PROTOCOL_VERSION.to_string(),
        topic: topic.to_string(),
    };
    send_control_json(writer, topic, &request).await?;

    let response: SubscribeResponse = recv_control_json(reader).await?;

    if response.protocol != PROTOCOL_NAME {
        return Err(ConnectionError::Handshake(format!(
            "unknown protocol '{}' (expected '{PROTOCOL_NAME}')",
            response.protocol
        )));
    }
    if !response.accepted {
        return Err(ConnectionError::Rejected(
            response
                .reason
                .unwrap_or_else(|| "no reason given".to_string()),
        ));
    }
    if !is_version_compatible(&response.version, PROTOCOL_VERSION)? {
        return Err(ConnectionError::Handshake(format!(
            "incompatible version '{}' (local '{PROTOCOL_VERSION}')",
            response.version
        )));
    }
    if response.topic != topic.as_str() {
        return Err(ConnectionError::Handshake(format!(
            "publisher serves '{}', not '{topic}'",
            response.topic
        )));
    }
    Ok(response)
}

/// Publisher side: read the subscriber's request.
pub(crate) async fn read_request<R>(
    reader: &mut Reader<R>,
) -> Result<SubscribeRequest, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    recv_control_json(reader).await
}

/// Publisher side: decide whether `request` may subscribe to `topic`.
/// The error is the rejection reason sent back to the subscriber.
pub(crate) fn check_request(request: &SubscribeRequest, topic: &Topic) -> Result<(), String> {
    if request.protocol != PROTOCOL_NAME {
        return Err(format!("unknown protocol '{}'", request.protocol));
    }
    match is_version_compatible(&request.version, PROTOCOL_VERSION) {
        Ok(true) => {}
        Ok(false) => {
            return Err(format!(
                "incompatible version '{}' (publisher '{PROTOCOL_VERSION}')",
                request.version
            ))
        }
        Err(err) => return Err(err.to_string()),
    }
    if request.topic != topic.as_str() {
        return Err(format!("topic mismatch: this endpoint serves '{topic}'"));
    }
    Ok(())
}

/// Publisher side: send the verdict.
pub(crate) async fn respond<W>(
    writer: &mut Writer<W>,
    topic: &Topic,
    verdict: Result<(), String>,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let response = SubscribeResponse {
        protocol: PROTOCOL_NAME.to_string(),
        version: PROTOCOL_VERSION.to_string(),
        topic: topic.to_string(),
        accepted: verdict.is_ok(),
        reason: verdict.err(),
    };
    send_control_json(writer, topic, &response).await
}

async fn send_control_json<T, W>(
    writer: &mut Writer<W>,
    topic: &Topic,
    value: &T,
) -> Result<(), ConnectionError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value)?;
    writer
        .send(Frame::new(topic.clone(), Kind::Control, 0, payload))
        .await?;
    Ok(())
}

async fn recv_control_json<T, R>(reader: &mut Reader<R>) -> Result<T, ConnectionError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(frame)) if frame.kind == Kind::Control => {
            if frame.payload.len() > MAX_HANDSHAKE_PAYLOAD {
                return Err(ConnectionError::Handshake(format!(
                    "handshake payload too large: {} (max {MAX_HANDSHAKE_PAYLOAD})",
                    frame.payload.len()
                )));
            }
            Ok(serde_json::from_slice(&frame.payload)?)
        }
        Some(Ok(frame)) => Err(ConnectionError::Handshake(format!(
            "expected control frame, got {}",
            frame.kind
        ))),
        Some(Err(ProtocolError::ConnectionClosed)) | None => Err(ConnectionError::Closed),
        Some(Err(err)) => Err(ConnectionError::Protocol(err)),
    }
}

/// Compatible when the major versions match.
fn is_version_compatible(remote: &str, local: &str) -> Result<bool, ConnectionError> {
    let (remote_major, _) = parse_version(remote)?;
    let (local_major, _) = parse_version(local)?;
    Ok(remote_major == local_major)
}

fn parse_version(version: &str) -> Result<(u16, u16), ConnectionError> {
    let invalid = |what: &str| ConnectionError::Handshake(format!("invalid version '{version}': {what}"));

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use nitros_frame::FrameConfig;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    type Side = (
        Reader<ReadHalf<DuplexStream>>,
        Writer<WriteHalf<DuplexStream>>,
    );

    fn framed(stream: DuplexStream) -> Side {
        let (r, w) = split(stream);
        (
            FramedRead::new(r, FrameCodec::new(FrameConfig::default())),
            FramedWrite::new(w, FrameCodec::new(FrameConfig::default())),
        )
    }

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    async fn serve_once(mut side: Side, served: Topic, room: bool) -> Result<(), String> {
        let request = read_request(&mut side.0).await.unwrap();
        let verdict = check_request(&request, &served).and_then(|()| {
            if room {
                Ok(())
            } else {
                Err("subscriber limit reached".to_string())
            }
        });
        respond(&mut side.1, &served, verdict.clone()).await.unwrap();
        verdict
    }

    #[tokio::test]
    async fn successful_handshake() {
        let (a, b) = duplex(4096);
        let server = tokio::spawn(serve_once(framed(a), topic("sensors"), true));

        let (mut reader, mut writer) = framed(b);
        let response = subscribe(&mut reader, &mut writer, &topic("sensors"))
            .await
            .unwrap();
        assert!(response.accepted);
        assert_eq!(response.version, PROTOCOL_VERSION);
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn topic_mismatch_is_rejected() {
        let (a, b) = duplex(4096);
        let server = tokio::spawn(serve_once(framed(a), topic("camera"), true));

        let (mut reader, mut writer) = framed(b);
        let err = subscribe(&mut reader, &mut writer, &topic("sensors"))
            .await
            .unwrap_err();
        match err {
            ConnectionError::Rejected(reason) => assert!(reason.contains("topic mismatch")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn full_publisher_rejects() {
        let (a, b) = duplex(4096);
        let server = tokio::spawn(serve_once(framed(a), topic("sensors"), false));

        let (mut reader, mut writer) = framed(b);
        let err = subscribe(&mut reader, &mut writer, &topic("sensors"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Rejected(ref r) if r.contains("limit")));
        server.await.unwrap().unwrap_err();
    }

    #[tokio::test]
    async fn closed_before_response() {
        let (a, b) = duplex(4096);
        drop(a);
        let (mut reader, mut writer) = framed(b);
        let err = subscribe(&mut reader, &mut writer, &topic("sensors"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Closed | ConnectionError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn data_frame_instead_of_response() {
        let (a, b) = duplex(4096);
        let (_r, mut w) = framed(a);
        w.send(Frame::new(topic("sensors"), Kind::Structured, 0, &b"x"[..]))
            .await
            .unwrap();

        let (mut reader, _writer) = framed(b);
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(ref m) if m.contains("control")));
    }

    #[test]
    fn version_rules() {
        assert!(is_version_compatible("1.0", "1.0").unwrap());
        assert!(is_version_compatible("1.7", "1.0").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.0.0").is_err());
        assert!(parse_version("a.0").is_err());
    }

    #[test]
    fn check_request_rules() {
        let t = topic("sensors");
        let ok = SubscribeRequest {
            protocol: PROTOCOL_NAME.into(),
            version: "1.3".into(),
            topic: "sensors".into(),
        };
        assert!(check_request(&ok, &t).is_ok());

        let wrong_protocol = SubscribeRequest {
            protocol: "ipc".into(),
            ..ok.clone()
        };
        assert!(check_request(&wrong_protocol, &t).is_err());

        let wrong_major = SubscribeRequest {
            version: "2.0".into(),
            ..ok.clone()
        };
        assert!(check_request(&wrong_major, &t)
            .unwrap_err()
            .contains("incompatible"));

        let garbage_version = SubscribeRequest {
            version: "x".into(),
            ..ok
        };
        assert!(check_request(&garbage_version, &t).is_err());
    }

    #[test]
    fn reason_omitted_when_accepted() {
        let response = SubscribeResponse {
            protocol: PROTOCOL_NAME.into(),
            version: PROTOCOL_VERSION.into(),
            topic: "t".into(),
            accepted: true,
            reason: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("reason"));
    }
}
