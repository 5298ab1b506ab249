use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Bind an unconnected datagram endpoint for `rtspu` signaling.
///
/// The socket is bound to the unspecified address of the peer's family with
/// an ephemeral port; requests go out with `send_to`.
pub fn bind_control(peer: SocketAddr, io_timeout: Duration) -> io::Result<UdpSocket> {
    let any: IpAddr = match peer {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind(SocketAddr::new(any, 0))?;
    socket.set_read_timeout(Some(io_timeout))?;
    socket.set_write_timeout(Some(io_timeout))?;
    tracing::debug!(%peer, local = ?socket.local_addr().ok(), "control datagram socket bound");
    Ok(socket)
}

/// Find a free even/odd UDP port pair at or above `floor` on `ip`.
///
/// Each candidate is probed by binding both ports; the probe sockets are
/// dropped before returning so the caller can bind them for media. Returns
/// the even (RTP) port, or `None` if the range is exhausted.
pub fn find_open_port(ip: IpAddr, floor: u16) -> Option<u16> {
    let mut port = floor.max(2).checked_add(floor & 1)?;
    loop {
        let rtcp = port.checked_add(1)?;
        let rtp_probe = UdpSocket::bind(SocketAddr::new(ip, port));
        let rtcp_probe = UdpSocket::bind(SocketAddr::new(ip, rtcp));
        if rtp_probe.is_ok() && rtcp_probe.is_ok() {
            tracing::trace!(port, "found open UDP port pair");
            return Some(port);
        }
        port = port.checked_add(2)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn open_port_is_even_and_bindable() {
        let port = find_open_port(LOCALHOST, 20001).unwrap();
        assert!(port >= 20002);
        assert_eq!(port % 2, 0);
        UdpSocket::bind((LOCALHOST, port)).unwrap();
        UdpSocket::bind((LOCALHOST, port + 1)).unwrap();
    }

    #[test]
    fn occupied_pair_is_skipped() {
        let port = find_open_port(LOCALHOST, 21000).unwrap();
        let _held = UdpSocket::bind((LOCALHOST, port + 1)).unwrap();
        let next = find_open_port(LOCALHOST, port).unwrap();
        assert!(next > port);
    }

    #[test]
    fn range_exhaustion_yields_none() {
        // 65534/65535 is the last pair; holding 65535 leaves nothing.
        if let Ok(_held) = UdpSocket::bind((LOCALHOST, 65535)) {
            assert_eq!(find_open_port(LOCALHOST, 65534), None);
        }
    }
}
