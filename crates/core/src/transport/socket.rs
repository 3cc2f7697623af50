//! Fail-over bind, send and connect across resolved alternatives.
//!
//! A name may resolve to both an IPv4 and an IPv6 address while only one
//! family is usable on the current link. Each operation walks the
//! alternatives in resolver order and stops at the first success. Per-try
//! failures are logged at `trace` and only surface as
//! [`NetError::Socket`] once every alternative failed.

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{NetError, Result};
use crate::transport::address::{ResolvedAddress, ResolvedAddressPort};

/// Datagram socket operations needed by [`send_any`].
///
/// Implemented for both the blocking std socket and the `mio` socket used
/// by the receive loop.
pub trait DatagramSocket {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, target)
    }
}

impl DatagramSocket for mio::net::UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        mio::net::UdpSocket::local_addr(self)
    }

    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        mio::net::UdpSocket::send_to(self, payload, target)
    }
}

/// Socket address for `ip:port` in the native family of `ip`.
///
/// IPv4-mapped alternatives become plain IPv4 addresses so they can be used
/// with `AF_INET` sockets.
pub fn native_socket_addr(ip: Ipv6Addr, port: u16) -> SocketAddr {
    match ip.to_ipv4_mapped() {
        Some(v4) => SocketAddr::V4(SocketAddrV4::new(v4, port)),
        None => SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)),
    }
}

/// Target for a datagram sent from a socket bound in `local`'s family.
///
/// IPv6 sockets are dual-stack, so IPv4 peers are addressed in mapped form.
/// IPv4 sockets cannot reach IPv6-only alternatives.
fn target_for(local: &SocketAddr, ip: Ipv6Addr, port: u16) -> io::Result<SocketAddr> {
    match local {
        SocketAddr::V6(_) => Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))),
        SocketAddr::V4(_) => match ip.to_ipv4_mapped() {
            Some(v4) => Ok(SocketAddr::V4(SocketAddrV4::new(v4, port))),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "IPv6 destination from an IPv4 socket",
            )),
        },
    }
}

fn bind_one(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let SocketAddr::V6(v6) = addr {
        if v6.ip().is_unspecified() {
            socket.set_only_v6(false)?;
        }
    }
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Bind a UDP socket to the first alternative that accepts `port`.
///
/// A fresh socket of the alternative's family is created for each try.
pub fn bind_any(resolved: &ResolvedAddress, port: u16) -> Result<UdpSocket> {
    let mut last_err = None;
    for ip in resolved.alternatives() {
        let addr = native_socket_addr(*ip, port);
        match bind_one(addr) {
            Ok(socket) => {
                tracing::debug!(%addr, "socket bound");
                return Ok(socket);
            }
            Err(e) => {
                tracing::trace!(%addr, error = %e, "bind alternative failed");
                last_err = Some(e);
            }
        }
    }
    Err(exhausted("bind", resolved.alternatives().len(), last_err))
}

/// Send `payload` to the first destination alternative that accepts it.
///
/// Returns the number of bytes sent.
pub fn send_any<S: DatagramSocket>(
    socket: &S,
    remote: &ResolvedAddressPort,
    payload: &[u8],
) -> Result<usize> {
    let local = socket.local_addr()?;
    let mut last_err = None;
    for ip in remote.address.alternatives() {
        let sent = target_for(&local, *ip, remote.port).and_then(|target| {
            socket.send_to(payload, target).inspect_err(|e| {
                tracing::trace!(%target, error = %e, "send alternative failed");
            })
        });
        match sent {
            Ok(n) => return Ok(n),
            Err(e) => last_err = Some(e),
        }
    }
    Err(exhausted("send", remote.address.alternatives().len(), last_err))
}

/// Open a TCP connection to the first reachable alternative.
pub fn connect_any(remote: &ResolvedAddressPort) -> Result<TcpStream> {
    let mut last_err = None;
    for ip in remote.address.alternatives() {
        let addr = native_socket_addr(*ip, remote.port);
        match TcpStream::connect(addr) {
            Ok(stream) => {
                tracing::debug!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(%addr, error = %e, "connect alternative failed");
                last_err = Some(e);
            }
        }
    }
    Err(exhausted("connect", remote.address.alternatives().len(), last_err))
}

fn exhausted(operation: &'static str, attempts: usize, last: Option<io::Error>) -> NetError {
    NetError::Socket {
        operation,
        attempts,
        source: last.unwrap_or_else(|| io::Error::other("no alternatives")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    fn mapped(a: u8, b: u8, c: u8, d: u8) -> Ipv6Addr {
        Ipv4Addr::new(a, b, c, d).to_ipv6_mapped()
    }

    #[test]
    fn bind_skips_unroutable_alternative() {
        // 192.0.2.0/24 is TEST-NET-1, never assigned to a local interface.
        let resolved =
            ResolvedAddress::new(vec![mapped(192, 0, 2, 1), mapped(127, 0, 0, 1)]).unwrap();
        let socket = bind_any(&resolved, 0).unwrap();
        assert_eq!(
            socket.local_addr().unwrap().ip(),
            std::net::IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn bind_fails_when_all_unroutable() {
        let resolved =
            ResolvedAddress::new(vec![mapped(192, 0, 2, 1), mapped(198, 51, 100, 1)]).unwrap();
        match bind_any(&resolved, 0) {
            Err(NetError::Socket {
                operation, attempts, ..
            }) => {
                assert_eq!(operation, "bind");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected socket error, got {other:?}"),
        }
    }

    #[test]
    fn send_skips_ipv6_alternative_on_ipv4_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let remote = ResolvedAddressPort {
            address: ResolvedAddress::new(vec![
                "2001:db8::1".parse().unwrap(),
                mapped(127, 0, 0, 1),
            ])
            .unwrap(),
            port,
        };
        assert_eq!(send_any(&sender, &remote, b"ping").unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn native_addr_unmaps_ipv4() {
        assert_eq!(
            native_socket_addr(mapped(10, 1, 2, 3), 80),
            "10.1.2.3:80".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            native_socket_addr(Ipv6Addr::LOCALHOST, 80),
            "[::1]:80".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn connect_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = ResolvedAddressPort {
            address: ResolvedAddress::new(vec![mapped(127, 0, 0, 1)]).unwrap(),
            port: listener.local_addr().unwrap().port(),
        };
        let stream = connect_any(&remote).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), listener.local_addr().unwrap());
    }
}
