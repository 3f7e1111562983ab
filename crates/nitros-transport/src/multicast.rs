use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};

use tokio::net::UdpSocket;
use tracing::info;

use crate::error::{Result, TransportError};

/// Multicast group membership settings.
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Group address (must be in 224.0.0.0/4).
    pub group: Ipv4Addr,
    /// UDP port shared by every participant.
    pub port: u16,
    /// Interface to join on. `UNSPECIFIED` lets the OS choose.
    pub interface: Ipv4Addr,
    /// Multicast TTL. `1` keeps datagrams on the local segment.
    pub ttl: u32,
    /// Deliver our own datagrams back to us (several processes on one host).
    pub loopback: bool,
}

impl MulticastConfig {
    /// The group as a destination address.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }
}

/// Bind a UDP socket on the group port and join the group.
///
/// The port is bound with `SO_REUSEADDR` (and `SO_REUSEPORT` where
/// available) so every process on the host can listen on it.
pub fn bind_multicast(config: &MulticastConfig) -> Result<UdpSocket> {
    let group = config.group_addr();
    let err = |source: std::io::Error| TransportError::Multicast { group, source };

    if !config.group.is_multicast() {
        return Err(err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "address is not a multicast group",
        )));
    }

    let socket = bind_shared(config.port).map_err(err)?;
    socket
        .join_multicast_v4(&config.group, &config.interface)
        .map_err(err)?;
    socket
        .set_multicast_loop_v4(config.loopback)
        .map_err(err)?;
    socket.set_multicast_ttl_v4(config.ttl).map_err(err)?;
    socket.set_nonblocking(true).map_err(err)?;

    let socket = UdpSocket::from_std(socket).map_err(err)?;
    info!(%group, interface = %config.interface, "joined discovery multicast group");
    Ok(socket)
}

#[cfg(unix)]
fn bind_shared(port: u16) -> std::io::Result<StdUdpSocket> {
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    // SAFETY: plain socket(2) call; the returned descriptor is checked below and
    // immediately wrapped in `OwnedFd` so every early return closes it.
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created, valid descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_flag(&fd, libc::SO_REUSEADDR)?;
    #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
    set_flag(&fd, libc::SO_REUSEPORT)?;

    // SAFETY: all-zero is a valid `sockaddr_in` bit pattern on every unix target.
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr {
        s_addr: u32::from(Ipv4Addr::UNSPECIFIED).to_be(),
    };

    // SAFETY: `addr` is an initialized `sockaddr_in` and the length matches it.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&addr as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(StdUdpSocket::from(fd))
}

#[cfg(unix)]
fn set_flag(fd: &std::os::fd::OwnedFd, option: libc::c_int) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let enable: libc::c_int = 1;
    // SAFETY: `enable` is a valid `c_int` for the duration of the call and the
    // length passed matches its size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&enable as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn bind_shared(port: u16) -> std::io::Result<StdUdpSocket> {
    StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> MulticastConfig {
        MulticastConfig {
            group: Ipv4Addr::new(239, 255, 73, 83),
            port,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            loopback: true,
        }
    }

    #[test]
    fn rejects_unicast_group() {
        let cfg = MulticastConfig {
            group: Ipv4Addr::new(10, 0, 0, 1),
            ..config(0)
        };
        let err = bind_multicast(&cfg).unwrap_err();
        assert!(matches!(err, TransportError::Multicast { .. }));
    }

    #[test]
    fn group_addr_uses_port() {
        assert_eq!(config(47000).group_addr().to_string(), "239.255.73.83:47000");
    }

    #[cfg(unix)]
    #[test]
    fn shared_port_binds_twice() {
        let first = bind_shared(0).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_shared(port).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }
}
