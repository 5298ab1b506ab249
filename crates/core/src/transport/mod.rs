//! Control connection for RTSP signaling.
//!
//! The location's scheme selects the carrier:
//!
//! | Scheme | Carrier | Default port |
//! |--------|---------|--------------|
//! | `rtsp` | TCP stream ([`tcp`]) | 554 |
//! | `rtspu` | UDP datagrams ([`udp`]) | 555 |
//! | `http` | TCP stream, requests tunneled as base64 POSTs | 80 |
//!
//! Media uses separate sockets (see [`crate::media`]) unless it is
//! interleaved on the TCP stream (RFC 2326 §10.12).

pub mod tcp;
pub mod udp;

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use url::Url;

use crate::error::{Result, RtspError};

pub use udp::find_open_port;

/// Control carrier chosen from the location scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Tcp,
    Udp,
    Http,
}

impl Carrier {
    pub fn from_url(url: &Url) -> Result<Self> {
        match url.scheme().to_ascii_lowercase().as_str() {
            "rtsp" => Ok(Carrier::Tcp),
            "rtspu" => Ok(Carrier::Udp),
            "http" => Ok(Carrier::Http),
            other => Err(RtspError::InvalidLocation(format!(
                "scheme must be rtsp, rtspu or http, got {other:?}"
            ))),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Carrier::Tcp => 554,
            Carrier::Udp => 555,
            Carrier::Http => 80,
        }
    }

    pub fn is_stream(self) -> bool {
        !matches!(self, Carrier::Udp)
    }
}

/// Resolve the location's host and port, preferring IPv4 addresses.
pub fn resolve(url: &Url, carrier: Carrier) -> Result<SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| RtspError::InvalidLocation(format!("{url} has no host")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = url.port().unwrap_or(carrier.default_port());

    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| RtspError::InvalidLocation(format!("{host} did not resolve")))
}

/// The single connection requests and responses travel over.
#[derive(Debug)]
pub enum ControlConnection {
    Stream(TcpStream),
    Datagram { socket: UdpSocket, peer: SocketAddr },
}

impl ControlConnection {
    /// Open the carrier to `peer`.
    ///
    /// Stream carriers bound the connect wait by `connect_timeout` and use
    /// `io_timeout` for reads and writes; datagram carriers bind an
    /// unconnected socket.
    pub fn open(
        carrier: Carrier,
        peer: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<Self> {
        match carrier {
            Carrier::Tcp | Carrier::Http => Ok(ControlConnection::Stream(tcp::connect(
                peer,
                connect_timeout,
                io_timeout,
            )?)),
            Carrier::Udp => Ok(ControlConnection::Datagram {
                socket: udp::bind_control(peer, io_timeout)?,
                peer,
            }),
        }
    }

    /// Write the whole buffer. A short datagram send is an error.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            ControlConnection::Stream(stream) => tcp::send_all(stream, data),
            ControlConnection::Datagram { socket, peer } => {
                let sent = socket.send_to(data, *peer)?;
                if sent != data.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("sent {sent} of {} bytes", data.len()),
                    ));
                }
                Ok(())
            }
        }
    }

    /// One read into `buf`. Returns 0 when the peer closed the stream.
    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ControlConnection::Stream(stream) => io::Read::read(stream, buf),
            ControlConnection::Datagram { socket, .. } => {
                let (n, _from) = socket.recv_from(buf)?;
                Ok(n)
            }
        }
    }

    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        let timeout = Some(timeout.max(Duration::from_millis(1)));
        match self {
            ControlConnection::Stream(stream) => stream.set_read_timeout(timeout),
            ControlConnection::Datagram { socket, .. } => socket.set_read_timeout(timeout),
        }
    }

    /// A second handle on the stream, for a reader thread.
    pub fn try_clone_stream(&self) -> Option<TcpStream> {
        match self {
            ControlConnection::Stream(stream) => stream.try_clone().ok(),
            ControlConnection::Datagram { .. } => None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            ControlConnection::Stream(stream) => stream.local_addr(),
            ControlConnection::Datagram { socket, .. } => socket.local_addr(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            ControlConnection::Stream(stream) => stream.peer_addr(),
            ControlConnection::Datagram { peer, .. } => Ok(*peer),
        }
    }

    /// Shut the stream down so a blocked reader thread wakes up.
    pub fn close(self) {
        if let ControlConnection::Stream(stream) = self {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_from_scheme() {
        let u = |s| Url::parse(s).unwrap();
        assert_eq!(Carrier::from_url(&u("rtsp://cam/live")).unwrap(), Carrier::Tcp);
        assert_eq!(Carrier::from_url(&u("RTSPU://cam/live")).unwrap(), Carrier::Udp);
        assert_eq!(Carrier::from_url(&u("http://cam/live")).unwrap(), Carrier::Http);
        assert!(Carrier::from_url(&u("ftp://cam/live")).is_err());
    }

    #[test]
    fn resolve_uses_default_ports() {
        let url = Url::parse("rtsp://127.0.0.1/live").unwrap();
        assert_eq!(resolve(&url, Carrier::Tcp).unwrap().port(), 554);
        let url = Url::parse("rtspu://127.0.0.1/live").unwrap();
        assert_eq!(resolve(&url, Carrier::Udp).unwrap().port(), 555);
        let url = Url::parse("rtsp://127.0.0.1:8554/live").unwrap();
        assert_eq!(resolve(&url, Carrier::Tcp).unwrap().port(), 8554);
    }

    #[test]
    fn resolve_prefers_ipv4() {
        let url = Url::parse("rtsp://localhost:8554/live").unwrap();
        if let Ok(addr) = resolve(&url, Carrier::Tcp) {
            let all: Vec<_> = ("localhost", 8554).to_socket_addrs().unwrap().collect();
            if all.iter().any(|a| a.is_ipv4()) {
                assert!(addr.is_ipv4());
            }
        }
    }

    #[test]
    fn datagram_connection_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = server.local_addr().unwrap();
        let mut conn = ControlConnection::open(
            Carrier::Udp,
            peer,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();

        conn.send(b"OPTIONS * RTSP/1.0\r\n\r\n").unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = server.recv_from(&mut buf).unwrap();
        assert!(buf[..n].starts_with(b"OPTIONS"));

        server.send_to(b"RTSP/1.0 200 OK\r\n\r\n", from).unwrap();
        let n = conn.receive(&mut buf).unwrap();
        assert!(buf[..n].starts_with(b"RTSP/1.0 200"));
        assert_eq!(conn.peer_addr().unwrap(), peer);
        assert!(conn.try_clone_stream().is_none());
    }
}
