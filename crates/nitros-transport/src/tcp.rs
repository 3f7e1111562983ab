use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// Probe address used to pick the outbound interface. No packet is sent.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 73, 83)), 9);

/// Bind a TCP listener and compute the endpoint other hosts should dial.
///
/// Port `0` picks a free port. When `host` is unspecified (`0.0.0.0`) the
/// advertised address is `advertise` if given, otherwise the address of the
/// interface that routes to the local network.
pub async fn bind_listener(
    host: IpAddr,
    port: u16,
    advertise: Option<IpAddr>,
) -> Result<(TcpListener, Endpoint)> {
    let addr = SocketAddr::new(host, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })?;
    let bound = listener.local_addr()?;

    let ip = match advertise {
        Some(ip) => ip,
        None if host.is_unspecified() => local_ip(),
        None => host,
    };
    let endpoint = Endpoint::new(ip, bound.port());

    info!(%bound, %endpoint, "listening for subscribers");
    Ok((listener, endpoint))
}

/// Connect to an endpoint with `TCP_NODELAY` set.
pub async fn connect(endpoint: Endpoint) -> Result<TcpStream> {
    let addr = endpoint.socket_addr();
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect { addr, source })?;
    stream.set_nodelay(true)?;
    debug!(%endpoint, "connected");
    Ok(stream)
}

/// Best-effort local IPv4 address, falling back to loopback.
pub fn local_ip() -> IpAddr {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| socket.connect(ROUTE_PROBE).map(|()| socket))
        .and_then(|socket| socket.local_addr());

    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(err) => {
            debug!(error = %err, "route probe failed; advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn bind_connect_roundtrip() {
        let (listener, endpoint) = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None)
            .await
            .unwrap();
        assert_eq!(endpoint.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(endpoint.port(), 0);

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut client = connect(endpoint).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn advertise_override_wins() {
        let advertised = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let (_listener, endpoint) =
            bind_listener(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, Some(advertised))
                .await
                .unwrap();
        assert_eq!(endpoint.ip(), advertised);
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let (listener, endpoint) = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None)
            .await
            .unwrap();
        drop(listener);

        let err = connect(endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn local_ip_is_never_unspecified() {
        assert!(!local_ip().is_unspecified());
    }
}
